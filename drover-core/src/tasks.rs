//! Built-in task kinds.

mod flaky;
mod noop;
mod sequence;
mod sleep;

pub use flaky::Flaky;
pub use noop::Noop;
pub use sequence::Sequence;
pub use sleep::Sleep;

use crate::registry::{TaskKind, TaskRegistry};

pub(crate) fn register_builtins(registry: &mut TaskRegistry) {
    registry
        .register(
            "noop",
            TaskKind {
                build: noop::build,
                docs: Vec::new,
            },
        )
        .register(
            "sleep",
            TaskKind {
                build: sleep::build,
                docs: || sleep::SCHEMA.docs(),
            },
        )
        .register(
            "flaky",
            TaskKind {
                build: flaky::build,
                docs: || flaky::SCHEMA.docs(),
            },
        )
        .register(
            "sequence",
            TaskKind {
                build: sequence::build,
                docs: || sequence::SCHEMA.docs(),
            },
        );
}
