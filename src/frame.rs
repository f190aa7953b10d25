//! Application frame recognition for the transmit path
//!
//! A host that receives half of a framed message at high speed may time out
//! waiting for the rest. The transmit path asks a [`Framing`] how long the
//! frame at the front of the queue is, and holds the queue until the whole
//! frame is present.

/// Recognizes application frames at the start of a transmit queue
pub trait Framing: Sync {
    /// Returns the total length of the frame that starts with `first`,
    /// including its header
    ///
    /// `first` is the oldest queued packet. Return `None` if `first` doesn't
    /// start a recognized frame; the transmit path then sends whatever is
    /// queued.
    fn frame_len(&self, first: &[u8]) -> Option<usize>;
}

/// Framing for the debugger wire protocol
///
/// Every message starts with a 32 byte header. The header begins with one
/// of the markers `MSdbgV1` or `MSpktV1`, and carries the payload size as a
/// little-endian `u32` at offset 28. A recognized header must arrive alone in
/// the first queued packet.
#[derive(Debug, Clone, Copy, Default)]
pub struct WireProtocol;

/// The default transmit framing
pub static WIRE_PROTOCOL: WireProtocol = WireProtocol;

impl WireProtocol {
    /// Header size, in bytes
    pub const HEADER_SIZE: usize = 32;
    /// Markers that start a frame
    ///
    /// Only the first seven bytes are compared.
    pub const MARKERS: [&'static [u8; 7]; 2] = [b"MSdbgV1", b"MSpktV1"];

    const SIZE_OFFSET: usize = 28;
}

impl Framing for WireProtocol {
    fn frame_len(&self, first: &[u8]) -> Option<usize> {
        if first.len() != Self::HEADER_SIZE {
            return None;
        }
        let marker = first.get(..7)?;
        if !Self::MARKERS.iter().any(|m| &m[..] == marker) {
            return None;
        }
        let size = first.get(Self::SIZE_OFFSET..Self::SIZE_OFFSET + 4)?;
        let payload = u32::from_le_bytes([size[0], size[1], size[2], size[3]]);
        (payload as usize).checked_add(Self::HEADER_SIZE)
    }
}

/// Build a wire protocol header for tests
#[cfg(test)]
pub(crate) fn header(marker: &[u8; 7], payload: u32) -> [u8; WireProtocol::HEADER_SIZE] {
    let mut header = [0; WireProtocol::HEADER_SIZE];
    header[..7].copy_from_slice(marker);
    header[WireProtocol::SIZE_OFFSET..].copy_from_slice(&payload.to_le_bytes());
    header
}
