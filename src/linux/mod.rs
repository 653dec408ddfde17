// This file is part of bcm283x-pwm-dma.
// Licensed under the MIT license. See LICENSE file in the project root for full license text.

//! Default Linux-userspace implementations of the collaborator traits in `crate::collaborators`.

pub mod board_id;
pub mod devmem;
pub mod mailbox;

pub use board_id::ProcCpuinfoBoardIdentifier;
pub use devmem::DevMemMapper;
pub use mailbox::VideoCoreMailbox;
