//! Evaluation surface: the two client-facing entry points that read through
//! the cache and run the engine from `flagforge-core`.

use std::collections::HashMap;

use chrono::Utc;
use tracing::debug;

use flagforge_core::{evaluate, EvaluationContext, EvaluationResult};

use crate::cache::FlagCache;
use crate::unknown_flags::UnknownFlagRecorder;

/// Evaluate every flag currently cached in a scope.
pub async fn evaluate_all(cache: &FlagCache, project_key: &str, environment_key: &str, ctx: &EvaluationContext) -> HashMap<String, EvaluationResult> {
    let Some(scope) = cache.get_flags(project_key, environment_key).await else {
        return HashMap::new();
    };

    scope
        .iter()
        .map(|(flag_key, cached)| {
            let result = evaluate(&cached.flag, &cached.config, ctx);
            debug!(project = project_key, environment = environment_key, flag = flag_key.as_str(), variant = result.variant.as_str(), reason = result.reason.as_str(), "evaluated flag");
            (flag_key.clone(), result)
        })
        .collect()
}

/// Evaluate one flag key; records an unknown-flag observation and returns
/// the `unknown` reason on a cache miss, never failing.
pub async fn evaluate_single(
    cache: &FlagCache,
    recorder: &UnknownFlagRecorder,
    project_id: flagforge_core::ProjectId,
    environment_id: flagforge_core::EnvironmentId,
    project_key: &str,
    environment_key: &str,
    flag_key: &str,
    ctx: &EvaluationContext,
) -> EvaluationResult {
    match cache.get_flag(project_key, environment_key, flag_key).await {
        Some(cached) => {
            let result = evaluate(&cached.flag, &cached.config, ctx);
            debug!(project = project_key, environment = environment_key, flag = flag_key, variant = result.variant.as_str(), reason = result.reason.as_str(), "evaluated flag");
            result
        }
        None => {
            if let Err(err) = recorder.observe(project_id, environment_id, flag_key, Utc::now()).await {
                debug!(error = %err, flag = flag_key, "failed to record unknown flag observation");
            }
            EvaluationResult::unknown()
        }
    }
}
