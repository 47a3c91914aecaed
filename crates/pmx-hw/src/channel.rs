use std::sync::Arc;

/// Response size the driver ABI expects callers to offer for every operation.
pub const DRIVER_RESPONSE_LEN: usize = 0x1100;

/// Synchronous request/response transport to the driver.
///
/// `response_len` is the buffer capacity offered to the driver. `None` means the call
/// failed for any reason (no driver, access denied, device error); implementations do
/// not distinguish.
pub trait ControlChannel {
    fn submit(&self, code: u32, request: &[u8], response_len: usize) -> Option<Vec<u8>>;
}

impl<T: ControlChannel + ?Sized> ControlChannel for &T {
    fn submit(&self, code: u32, request: &[u8], response_len: usize) -> Option<Vec<u8>> {
        (**self).submit(code, request, response_len)
    }
}

impl<T: ControlChannel + ?Sized> ControlChannel for Box<T> {
    fn submit(&self, code: u32, request: &[u8], response_len: usize) -> Option<Vec<u8>> {
        (**self).submit(code, request, response_len)
    }
}

impl<T: ControlChannel + ?Sized> ControlChannel for Arc<T> {
    fn submit(&self, code: u32, request: &[u8], response_len: usize) -> Option<Vec<u8>> {
        (**self).submit(code, request, response_len)
    }
}
