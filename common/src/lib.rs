/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Common support code shared by the veriboot trust pipeline stages.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

pub mod crc8;
pub mod handoff;
pub mod memops;
#[macro_use]
pub mod printer;
pub mod shared_data;
pub mod workbuf;

pub use handoff::{BootHandoff, HANDOFF_MARKER, HANDOFF_SLOT_NONE};
pub use printer::{HexBytes, HexWord};
pub use shared_data::{SharedData, SHARED_DATA_MAGIC};
pub use workbuf::{Workbuf, WORKBUF_ALIGN};

use veriboot_types::RecoveryReason;

/// Flow-control outcome of a pipeline stage.  These are not errors; a
/// caller receiving anything but `Continue` must surface the value to the
/// platform so it can perform the matching hardware action.
#[must_use]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BootAction {
    /// Proceed to the next stage
    Continue,

    /// Reboot the AP; NV and secure storage survive
    Reboot,

    /// Cold-reset the EC back to its RO image, then reboot
    RebootToRo,

    /// Cold-reset so the EC swaps to its freshly written RW slot
    RebootToSwitchRw,

    /// Reboot into recovery with the given reason
    Recovery(RecoveryReason),
}
