//! Understanding the utterance: code extraction, phrasing signals and task
//! classification.

pub mod classifier;
pub mod codes;
pub mod errors;
pub mod rules;
pub mod semantic;
pub mod text;

pub use classifier::{Classification, IntentClassifier, TaskConfidence};
pub use codes::{Code, CodeFamily};
pub use errors::EmbeddingError;
pub use rules::RuleClassifier;
pub use semantic::{Embedder, HashEmbedder, HttpEmbedder, SemanticClassifier};
pub use text::{is_offline_request, normalize};
