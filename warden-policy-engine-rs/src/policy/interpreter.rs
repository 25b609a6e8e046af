//! Iterative predicate interpreter.
//!
//! Expressions are evaluated with an explicit frame stack rather than
//! recursion. Every frame consumes one step of the per-policy budget, and the
//! cancel flag is polled at a fixed step interval.

use serde_json::Value;

use crate::admission::AdmissionRequest;
use crate::policy::engine::{CancelFlag, Policy, PolicyEvaluator};
use crate::policy::path::FieldPath;
use crate::policy::rule::{Expr, MessageTemplate, TemplatePart};
use crate::policy::verdict::{EvaluationFault, Verdict};

/// Default step budget per policy evaluation
pub const DEFAULT_MAX_STEPS: u64 = 100_000;

/// Steps between two polls of the cancel flag
const CANCEL_POLL_INTERVAL: u64 = 64;

/// Rendered in place of a message placeholder that resolves to nothing
const ABSENT_PLACEHOLDER: &str = "<none>";

static NULL: Value = Value::Null;

/// Read-only view of one request as seen by policy predicates
#[derive(Debug)]
pub struct EvaluationInput<'a> {
    request: &'a AdmissionRequest,
    metadata: Value,
}

impl<'a> EvaluationInput<'a> {
    pub fn new(request: &'a AdmissionRequest) -> Self {
        Self {
            request,
            metadata: request.metadata(),
        }
    }

    pub fn admission_request(&self) -> &AdmissionRequest {
        self.request
    }

    pub fn object(&self) -> Option<&Value> {
        self.request.object.as_ref()
    }

    pub fn old_object(&self) -> Option<&Value> {
        self.request.old_object.as_ref()
    }

    /// Request metadata (`$request`)
    pub fn request(&self) -> &Value {
        &self.metadata
    }
}

struct StepBudget<'c> {
    limit: u64,
    taken: u64,
    cancel: &'c CancelFlag,
}

impl<'c> StepBudget<'c> {
    fn new(limit: u64, cancel: &'c CancelFlag) -> Self {
        Self {
            limit,
            taken: 0,
            cancel,
        }
    }

    fn step(&mut self) -> Result<(), EvaluationFault> {
        if self.taken >= self.limit {
            return Err(EvaluationFault::BudgetExhausted { budget: self.limit });
        }
        self.taken += 1;
        if self.taken % CANCEL_POLL_INTERVAL == 0 && self.cancel.is_cancelled() {
            return Err(EvaluationFault::Cancelled);
        }
        Ok(())
    }
}

enum Frame<'e, 'v> {
    Eval(&'e Expr, &'v Value),
    All(std::slice::Iter<'e, Expr>, &'v Value),
    Any(std::slice::Iter<'e, Expr>, &'v Value),
    Not,
    AnyItem(std::vec::IntoIter<&'v Value>, &'e Expr),
    EveryItem(std::vec::IntoIter<&'v Value>, &'e Expr),
}

/// In-process evaluator for compiled policies
#[derive(Debug, Clone)]
pub struct Interpreter {
    max_steps: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STEPS)
    }
}

impl Interpreter {
    pub fn new(max_steps: u64) -> Self {
        Self { max_steps }
    }

    /// Evaluate every rule of a policy and collect the violation messages
    pub fn violations(
        &self,
        policy: &Policy,
        input: &EvaluationInput<'_>,
        cancel: &CancelFlag,
    ) -> Result<Vec<String>, EvaluationFault> {
        if cancel.is_cancelled() {
            return Err(EvaluationFault::Cancelled);
        }

        let mut budget = StepBudget::new(self.max_steps, cancel);
        let root = input.object().unwrap_or(&NULL);
        let mut messages = Vec::new();

        for rule in &policy.rules {
            match &rule.foreach {
                None => {
                    if self.test(&rule.when, root, input, &mut budget)? {
                        messages.push(render(&rule.message, root, input)?);
                    }
                }
                Some(path) => {
                    for item in elements(path, root, input)? {
                        budget.step()?;
                        if self.test(&rule.when, item, input, &mut budget)? {
                            messages.push(render(&rule.message, item, input)?);
                        }
                    }
                }
            }
        }

        Ok(messages)
    }

    fn test<'e, 'v>(
        &self,
        expr: &'e Expr,
        scope: &'v Value,
        input: &'v EvaluationInput<'_>,
        budget: &mut StepBudget<'_>,
    ) -> Result<bool, EvaluationFault> {
        let mut stack: Vec<Frame<'e, 'v>> = vec![Frame::Eval(expr, scope)];
        // Result of the most recently completed sub-expression
        let mut value = false;

        while let Some(frame) = stack.pop() {
            budget.step()?;

            match frame {
                Frame::Eval(expr, scope) => match expr {
                    Expr::Compare(cmp) => {
                        value = cmp.test(cmp.path.resolve(scope, input)?);
                    }
                    Expr::All(children) => {
                        stack.push(Frame::All(children.iter(), scope));
                        value = true;
                    }
                    Expr::Any(children) => {
                        stack.push(Frame::Any(children.iter(), scope));
                        value = false;
                    }
                    Expr::Not(inner) => {
                        stack.push(Frame::Not);
                        stack.push(Frame::Eval(inner.as_ref(), scope));
                    }
                    Expr::Some { path, predicate } => {
                        let items = elements(path, scope, input)?;
                        stack.push(Frame::AnyItem(items.into_iter(), predicate.as_ref()));
                        value = false;
                    }
                    Expr::Every { path, predicate } => {
                        let items = elements(path, scope, input)?;
                        stack.push(Frame::EveryItem(items.into_iter(), predicate.as_ref()));
                        value = true;
                    }
                },
                Frame::All(mut children, scope) => {
                    if value {
                        if let Some(next) = children.next() {
                            stack.push(Frame::All(children, scope));
                            stack.push(Frame::Eval(next, scope));
                        }
                    }
                }
                Frame::Any(mut children, scope) => {
                    if !value {
                        if let Some(next) = children.next() {
                            stack.push(Frame::Any(children, scope));
                            stack.push(Frame::Eval(next, scope));
                        }
                    }
                }
                Frame::Not => value = !value,
                Frame::AnyItem(mut items, predicate) => {
                    if !value {
                        if let Some(item) = items.next() {
                            stack.push(Frame::AnyItem(items, predicate));
                            stack.push(Frame::Eval(predicate, item));
                        }
                    }
                }
                Frame::EveryItem(mut items, predicate) => {
                    if value {
                        if let Some(item) = items.next() {
                            stack.push(Frame::EveryItem(items, predicate));
                            stack.push(Frame::Eval(predicate, item));
                        }
                    }
                }
            }
        }

        Ok(value)
    }
}

impl PolicyEvaluator for Interpreter {
    fn evaluate(&self, policy: &Policy, input: &EvaluationInput<'_>, cancel: &CancelFlag) -> Verdict {
        match self.violations(policy, input, cancel) {
            Ok(messages) => Verdict::from_messages(policy, messages),
            Err(fault) => Verdict::fault(policy, &fault),
        }
    }
}

/// Elements of a sequence-valued field. Absent or null is empty; a mapping
/// yields its values; a scalar is a fault.
fn elements<'v>(
    path: &FieldPath,
    scope: &'v Value,
    input: &'v EvaluationInput<'_>,
) -> Result<Vec<&'v Value>, EvaluationFault> {
    match path.resolve(scope, input)? {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items.iter().collect()),
        Some(Value::Object(map)) => Ok(map.values().collect()),
        Some(_) => Err(EvaluationFault::NotASequence {
            path: path.to_string(),
        }),
    }
}

fn render(
    template: &MessageTemplate,
    scope: &Value,
    input: &EvaluationInput<'_>,
) -> Result<String, EvaluationFault> {
    let mut out = String::new();
    for part in template.parts() {
        match part {
            TemplatePart::Literal(text) => out.push_str(text),
            TemplatePart::Field(path) => match path.resolve(scope, input)? {
                None | Some(Value::Null) => out.push_str(ABSENT_PLACEHOLDER),
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&other.to_string()),
            },
        }
    }
    Ok(out)
}
