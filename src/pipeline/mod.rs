//! # Pipeline Evaluator
//!
//! Drives an endpoint's steps in declared order: resolve arguments,
//! execute the query on the step's transaction, scan rows, apply the
//! result mapping, and grow the request context so later steps can see
//! earlier results. The final value handed to the response materializer
//! is the last step's mapping output.
//!
//! The evaluator short-circuits on the first error, rolls back every
//! open transaction, and discards all partial results.

mod context;
mod errors;

pub use context::RequestContext;
pub use errors::{PipelineError, PipelineResult};

use serde_json::Value;
use tracing::debug;

use crate::config::{ArgDef, QueryDef, StepDef};
use crate::db::Databases;
use crate::params::ParameterSet;
use crate::txn::TxnSet;

/// Evaluate a request against an endpoint's pipeline.
///
/// Opens every declared transaction up front, runs the steps, then
/// finalizes all transactions together: commit if every step succeeded,
/// rollback otherwise.
pub async fn evaluate(
    query: &QueryDef,
    dbs: &Databases,
    body: Value,
    params: ParameterSet,
) -> PipelineResult<Value> {
    let mut txns = TxnSet::open(&query.transactions, dbs)
        .await
        .map_err(PipelineError::Open)?;
    let mut ctx = RequestContext::new(body, params);

    match run_steps(&query.steps, &mut txns, &mut ctx).await {
        Ok(value) => {
            txns.commit_all().await;
            Ok(value)
        }
        Err(e) => {
            txns.rollback_all().await;
            Err(e)
        }
    }
}

async fn run_steps(
    steps: &[StepDef],
    txns: &mut TxnSet,
    ctx: &mut RequestContext,
) -> PipelineResult<Value> {
    let mut final_value = Value::Null;

    for (step, sd) in steps.iter().enumerate() {
        // Arguments resolve left to right; each resolved position lands in
        // the context before the next is evaluated, so an expression
        // argument can read earlier arguments of its own step.
        ctx.args = Vec::with_capacity(sd.args.len());
        for (index, ad) in sd.args.iter().enumerate() {
            let value = resolve_arg(ad, ctx, step, index).await?;
            ctx.args.push(value);
        }

        debug!(step, query = %sd.query, "executing step");
        let rows = txns
            .execute(sd.transaction, &sd.query, &ctx.args)
            .await
            .map_err(|source| PipelineError::Execute { step, source })?;
        ctx.steps.push(rows.clone());

        let output = sd
            .map
            .apply(rows, ctx.opaque())
            .await
            .map_err(|source| PipelineError::Map { step, source })?;
        ctx.outputs.push(output.clone());
        final_value = output;
    }

    Ok(final_value)
}

async fn resolve_arg(
    ad: &ArgDef,
    ctx: &RequestContext,
    step: usize,
    index: usize,
) -> PipelineResult<Value> {
    match ad {
        ArgDef::Literal(v) => Ok(v.clone()),
        ArgDef::Path(name) => {
            ctx.params
                .path
                .get(name)
                .cloned()
                .ok_or_else(|| PipelineError::MissingPathParam {
                    step,
                    index,
                    name: name.clone(),
                })
        }
        ArgDef::Query(name) => {
            ctx.params
                .query
                .get(name)
                .cloned()
                .ok_or_else(|| PipelineError::MissingQueryParam {
                    step,
                    index,
                    name: name.clone(),
                })
        }
        ArgDef::Expr(expr) => {
            let view = ctx.opaque();
            expr.eval(view.clone(), view)
                .await
                .map_err(|source| PipelineError::Arg {
                    step,
                    index,
                    source,
                })
        }
    }
}
