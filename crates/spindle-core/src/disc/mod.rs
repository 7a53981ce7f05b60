pub mod accumulator;
pub mod hook;
pub mod lost;
pub mod rotator;

pub use accumulator::{Admission, DiscAccumulator, Usage, Verdict};
pub use hook::{DispatchHook, DispatchReceipt, SealedDisc, ShellHook};
pub use lost::LostDiscReport;
pub use rotator::{DiscRotator, Rotation, RotationPhase};
