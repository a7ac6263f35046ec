// ── Domain model ──
//
// Value types handed across the correlator boundary. Both are immutable
// once built; every change produces a new instance.

mod event;
mod variable;

pub use event::EventRef;
pub use variable::{VariableKey, VariableRef};
