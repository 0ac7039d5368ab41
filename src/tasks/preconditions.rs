//! Precondition model and validator.
//!
//! A precondition resolves either from the utterance alone or from the
//! utterance plus the execution context. Resolution yields a value or
//! nothing. A resolver error counts as "not satisfied"; it only blocks the
//! task when the precondition is required.

use std::fmt;

use super::errors::ResolveError;
use super::registry::TaskKind;
use super::types::{ExecutionContext, MissingCondition, ParamValue, ResolvedParameters};
use crate::intent::codes;

pub type UtteranceResolver = fn(&str) -> Result<Option<ParamValue>, ResolveError>;
pub type ContextResolver = fn(&str, &ExecutionContext) -> Result<Option<ParamValue>, ResolveError>;

/// A resolver and the inputs it declares.
#[derive(Clone, Copy)]
pub enum Resolver {
    Utterance(UtteranceResolver),
    WithContext(ContextResolver),
}

impl fmt::Debug for Resolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolver::Utterance(_) => f.write_str("Resolver::Utterance"),
            Resolver::WithContext(_) => f.write_str("Resolver::WithContext"),
        }
    }
}

/// A named requirement owned by one task descriptor.
#[derive(Debug, Clone, Copy)]
pub struct Precondition {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub resolver: Resolver,
}

impl Precondition {
    pub fn resolve(
        &self,
        utterance: &str,
        ctx: &ExecutionContext,
    ) -> Result<Option<ParamValue>, ResolveError> {
        match self.resolver {
            Resolver::Utterance(resolve) => resolve(utterance),
            Resolver::WithContext(resolve) => resolve(utterance, ctx),
        }
    }
}

/// Outcome of validating one task against an utterance and context.
#[derive(Debug, Clone)]
pub struct Validation {
    pub valid: bool,
    pub missing: Vec<&'static Precondition>,
    pub satisfied: ResolvedParameters,
}

impl Validation {
    pub fn missing_conditions(&self) -> Vec<MissingCondition> {
        self.missing
            .iter()
            .map(|p| MissingCondition {
                name: p.name.to_string(),
                description: p.description.to_string(),
            })
            .collect()
    }
}

/// Validate a task's declared preconditions, in order.
pub fn validate(kind: TaskKind, utterance: &str, ctx: &ExecutionContext) -> Validation {
    let validation = validate_preconditions(kind.descriptor().preconditions, utterance, ctx);
    tracing::debug!(
        task = %kind,
        valid = validation.valid,
        satisfied = validation.satisfied.len(),
        missing = validation.missing.len(),
        "preconditions validated"
    );
    validation
}

/// Evaluate an ordered list of preconditions. Never fails.
pub fn validate_preconditions(
    preconditions: &'static [Precondition],
    utterance: &str,
    ctx: &ExecutionContext,
) -> Validation {
    let mut missing = Vec::new();
    let mut satisfied = ResolvedParameters::new();

    for precondition in preconditions {
        match precondition.resolve(utterance, ctx) {
            Ok(Some(value)) if !value.is_empty() => satisfied.insert(precondition.name, value),
            Ok(_) => {
                if precondition.required {
                    missing.push(precondition);
                }
            }
            Err(e) => {
                tracing::debug!(precondition = precondition.name, error = %e, "resolver failed");
                if precondition.required {
                    missing.push(precondition);
                }
            }
        }
    }

    Validation {
        valid: missing.is_empty(),
        missing,
        satisfied,
    }
}

// ─── Resolvers ──────────────────────────────────────────────────────────────

/// Garment/job codes mentioned in the utterance.
pub fn resolve_codes(utterance: &str) -> Result<Option<ParamValue>, ResolveError> {
    let found = codes::extract(utterance);
    Ok((!found.is_empty()).then_some(ParamValue::Codes(found)))
}

/// The uploaded file from context. A file whose rows carry no columns is
/// unusable.
pub fn resolve_upload(
    _utterance: &str,
    ctx: &ExecutionContext,
) -> Result<Option<ParamValue>, ResolveError> {
    let Some(file) = ctx.file_data() else {
        return Ok(None);
    };
    if !file.is_empty() && file.columns.is_empty() {
        return Err(ResolveError {
            precondition: "file_data",
            reason: "uploaded file has no columns".into(),
        });
    }
    Ok(Some(ParamValue::File(file.clone())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Table;
    use serde_json::json;

    fn failing(_: &str) -> Result<Option<ParamValue>, ResolveError> {
        Err(ResolveError {
            precondition: "broken",
            reason: "boom".into(),
        })
    }

    static OPTIONAL_BROKEN: [Precondition; 1] = [Precondition {
        name: "broken",
        description: "always fails",
        required: false,
        resolver: Resolver::Utterance(failing),
    }];

    static REQUIRED_BROKEN: [Precondition; 2] = [
        Precondition {
            name: "codes",
            description: "codes",
            required: false,
            resolver: Resolver::Utterance(resolve_codes),
        },
        Precondition {
            name: "broken",
            description: "always fails",
            required: true,
            resolver: Resolver::Utterance(failing),
        },
    ];

    #[test]
    fn optional_codes_never_block() {
        let ctx = ExecutionContext::new("báo cáo dm technical");
        let v = validate(TaskKind::DmTechnical, ctx.utterance(), &ctx);
        assert!(v.valid);
        assert!(v.satisfied.is_empty());

        let ctx = ExecutionContext::new("Xem DM Technical cho S24M12345");
        let v = validate(TaskKind::DmTechnical, ctx.utterance(), &ctx);
        assert!(v.valid);
        let codes = v.satisfied.codes();
        assert_eq!(codes.iter().next().unwrap().as_str(), "S24M12345");
    }

    #[test]
    fn missing_upload_is_reported() {
        let ctx = ExecutionContext::new("cập nhật trims list");
        let v = validate(TaskKind::InsertTrims, ctx.utterance(), &ctx);
        assert!(!v.valid);
        assert_eq!(v.missing.len(), 1);
        assert_eq!(v.missing_conditions()[0].name, "file_data");
    }

    #[test]
    fn empty_upload_does_not_satisfy() {
        let ctx = ExecutionContext::new("cập nhật trims list").with_file(Table::empty());
        let v = validate(TaskKind::InsertTrims, ctx.utterance(), &ctx);
        assert!(!v.valid);
    }

    #[test]
    fn upload_resolves_from_context() {
        let file = Table::from_json(json!([{"THV_CODE": "T1", "CONVERT": 1.0}]));
        let ctx = ExecutionContext::new("cập nhật trims list").with_file(file.clone());
        let v = validate(TaskKind::InsertTrims, ctx.utterance(), &ctx);
        assert!(v.valid);
        assert_eq!(v.satisfied.file(), Some(&file));
    }

    #[test]
    fn resolver_errors_only_block_when_required() {
        let ctx = ExecutionContext::new("S24M12345");
        let v = validate_preconditions(&OPTIONAL_BROKEN, ctx.utterance(), &ctx);
        assert!(v.valid);

        let v = validate_preconditions(&REQUIRED_BROKEN, ctx.utterance(), &ctx);
        assert!(!v.valid);
        assert_eq!(v.missing[0].name, "broken");
        // Earlier preconditions still resolve.
        assert!(v.satisfied.contains("codes"));
    }

    #[test]
    fn columnless_upload_is_a_resolver_error() {
        let file = Table {
            columns: Vec::new(),
            rows: vec![serde_json::Map::new()],
        };
        let ctx = ExecutionContext::new("cập nhật fabric list").with_file(file);
        assert!(resolve_upload(ctx.utterance(), &ctx).is_err());
        let v = validate(TaskKind::InsertFabric, ctx.utterance(), &ctx);
        assert!(!v.valid);
    }
}
