//! Quality gates and result validators.
//!
//! Ready-made [`Validator`](plotloom_core::Validator) and
//! [`PhaseGate`](plotloom_core::PhaseGate) implementations for common
//! checks over structured results: required fields, empty violation lists,
//! numeric thresholds, and combinations of gates.

#![warn(missing_docs)]

pub mod path;
pub mod validator;
pub mod gate;

pub use validator::{EmptyCollection, FnValidator, RequiredFields, Threshold};
pub use gate::{AllCompleted, CompositeGate, FnGate, PassCondition, ResultCheck};
