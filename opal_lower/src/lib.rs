//! Bytecode-to-IR translation.
//!
//! The translator abstractly interprets the virtual operand stack of a
//! stack-machine method, lifting it into the explicit-value IR: one basic
//! block per branch-target region, with the operand stack contents at each
//! block boundary becoming block parameters. Because every edge passes its
//! stack explicitly, no dominance-frontier phi construction is needed:
//! convergence just requires the stack types to agree on every incoming
//! edge, and any disagreement is a hard error in the input.

mod error;
mod targets;
mod translate;

pub use error::{LowerError, LowerResult};
pub use translate::translate;
