//! Test and helper mocks for hopper_core

use hopper_traits::{ChangeRecord, IoctlCmd};

/// A transport that always errors on read; useful when driving the state
/// machine with externally supplied records via `poll_record`. Control
/// commands are accepted and discarded.
pub struct NoopTransport;

impl hopper_traits::Transport for NoopTransport {
    fn read(
        &mut self,
    ) -> Result<Option<ChangeRecord>, Box<dyn std::error::Error + Send + Sync>> {
        Err(Box::new(std::io::Error::other("noop transport")))
    }

    fn ioctl(
        &mut self,
        _cmd: IoctlCmd,
        _value: u8,
    ) -> Result<u8, Box<dyn std::error::Error + Send + Sync>> {
        Ok(0)
    }
}
