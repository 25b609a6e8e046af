// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
pub mod config;
pub mod engine;
pub mod interpreter;
pub mod path;
pub mod rule;
pub mod selector;
pub mod verdict;

pub use config::{PolicyDefinition, Severity};
pub use engine::{
    CancelFlag, EvaluationEngine, Policy, PolicyCompileError, PolicyEvaluator, PolicySet,
    SetOrigin,
};
pub use interpreter::{EvaluationInput, Interpreter};
pub use rule::{Operator, Rule};
pub use selector::TargetSelector;
pub use verdict::{EvaluationFault, Outcome, Verdict};
