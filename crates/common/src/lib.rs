pub mod bounds;
pub mod change;

pub use change::{
    ChangeMessage,
    ChangeType,
    Metadata,
};
