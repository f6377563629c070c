//! # Expression Runtime Adapter
//!
//! Wraps the jq engine with the contract the pipeline needs: compile text
//! once at startup, then evaluate with an input and a context variable,
//! yielding exactly one value.
//!
//! Evaluation runs on the blocking pool so a long-running filter cannot
//! stall a runtime worker; the awaiting request future remains cancellable
//! at the join point.

mod errors;

pub use errors::{ExprError, ExprResult};

use jaq_interpret::{Ctx, FilterT, ParseCtx, RcIter, Val};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Name of the variable carrying the opaque request context, referenced in
/// filters as `$context`. Protocol constant, not user-configurable.
pub const CONTEXT_VAR: &str = "context";

/// A compiled jq expression.
///
/// Compilation happens in two phases: parse at config load (errors surface
/// at startup) and a trial lowering against the standard library so
/// undefined filter names are also a startup error. The parsed form is
/// plain data, so expressions are freely shared across requests.
#[derive(Debug, Clone)]
pub struct Expr {
    source: String,
    main: jaq_syn::Main,
}

impl Expr {
    /// Parse and check-compile an expression.
    pub fn compile(source: &str) -> ExprResult<Self> {
        let (main, errs) = jaq_parse::parse(source, jaq_parse::main());
        if !errs.is_empty() {
            return Err(ExprError::Parse(format!("{:?}", errs)));
        }
        let main = main.ok_or_else(|| ExprError::Parse("empty expression".to_string()))?;

        let mut defs = new_parse_ctx();
        let _ = defs.compile(main.clone());
        if !defs.errs.is_empty() {
            let msg = defs
                .errs
                .iter()
                .map(|(e, _)| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ExprError::Compile(msg));
        }

        Ok(Self {
            source: source.to_string(),
            main,
        })
    }

    /// The original expression source.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Evaluate with the given input and `$context` binding, synchronously.
    ///
    /// Enforces the single-result contract: zero values is `NoResult`, a
    /// failed or error-valued result is `Eval`, and a second value is
    /// `MultipleResults`.
    pub fn eval_sync(&self, input: Value, context: Value) -> ExprResult<Value> {
        let mut defs = new_parse_ctx();
        let filter = defs.compile(self.main.clone());
        if !defs.errs.is_empty() {
            let msg = defs
                .errs
                .iter()
                .map(|(e, _)| e.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ExprError::Compile(msg));
        }

        let inputs = RcIter::new(core::iter::empty());
        let ctx = Ctx::new([Val::from(context)], &inputs);
        let mut out = filter.run((ctx, Val::from(input)));

        let first = match out.next() {
            None => return Err(ExprError::NoResult),
            Some(Err(e)) => return Err(ExprError::Eval(e.to_string())),
            Some(Ok(v)) => v,
        };
        if out.next().is_some() {
            return Err(ExprError::MultipleResults);
        }
        Ok(Value::from(first))
    }

    /// Evaluate on the blocking pool.
    pub async fn eval(&self, input: Value, context: Value) -> ExprResult<Value> {
        let expr = self.clone();
        tokio::task::spawn_blocking(move || expr.eval_sync(input, context))
            .await
            .map_err(|_| ExprError::Aborted)?
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.source)
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let source = String::deserialize(deserializer)?;
        Expr::compile(&source).map_err(D::Error::custom)
    }
}

/// An ordered chain of expressions applied end-to-end to a single value.
///
/// The empty chain is the identity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping(pub Vec<Expr>);

impl Mapping {
    /// Whether the chain has no stages.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Thread `input` through every stage, synchronously.
    ///
    /// A stage failure aborts the chain with the failing index attached.
    pub fn apply_sync(&self, input: Value, context: &Value) -> ExprResult<Value> {
        let mut output = input;
        for (i, expr) in self.0.iter().enumerate() {
            output = expr
                .eval_sync(output, context.clone())
                .map_err(|e| e.at(i))?;
        }
        Ok(output)
    }

    /// Thread `input` through every stage on the blocking pool.
    pub async fn apply(&self, input: Value, context: Value) -> ExprResult<Value> {
        if self.0.is_empty() {
            return Ok(input);
        }
        let chain = self.clone();
        tokio::task::spawn_blocking(move || chain.apply_sync(input, &context))
            .await
            .map_err(|_| ExprError::Aborted)?
    }
}

fn new_parse_ctx() -> ParseCtx {
    let mut defs = ParseCtx::new(vec![CONTEXT_VAR.to_string()]);
    defs.insert_natives(jaq_core::core());
    defs.insert_defs(jaq_std::std());
    defs
}
