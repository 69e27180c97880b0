//! Integration tests: scheduling, broker disciplines, full conversations and
//! system lifecycle.

mod broker_discipline;
mod end_to_end;
mod lifecycle;
mod scheduling;
mod support;
