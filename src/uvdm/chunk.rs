//! Wire format of UVDM frames.
//!
//! Every frame is an unstructured VDM of the Samsung vendor ID:
//!
//! | object | first long chunk | later long chunk | short / response |
//! |--------|------------------|------------------|------------------|
//! | 0      | VDM header       | VDM header       | VDM header       |
//! | 1      | UVDM header      | UVDM header      | UVDM header      |
//! | 2      | transfer header  | data             |                  |
//! | 3..=5  | data (12 bytes)  | data (16 bytes)  |                  |
//! | 6      | tailer           | tailer           |                  |
//!
//! The tailer carries a checksum over the four words that precede it.
use byteorder::{ByteOrder, LittleEndian};
use heapless::Vec;
use proc_bitfield::bitfield;

use super::{Direction, UvdmError};
use crate::protocol_layer::message::MAX_DATA_OBJECTS;
use crate::protocol_layer::message::data::vendor_defined::{SAMSUNG_VID, VdmHeader, VdmHeaderUnstructured};

/// Payload bytes in the first chunk of a long transfer.
pub const FIRST_CHUNK_BYTES: usize = 12;
/// Payload bytes in every later chunk.
pub const NORMAL_CHUNK_BYTES: usize = 16;
/// Bytes covered by the checksum.
pub const CHECKSUM_COUNT: usize = 16;
/// Chunk sequence numbers are eight bits wide.
pub const MAX_CHUNKS: usize = 255;
/// The largest payload that one transfer can carry.
pub const MAX_PAYLOAD_SIZE: usize = FIRST_CHUNK_BYTES + (MAX_CHUNKS - 1) * NORMAL_CHUNK_BYTES;

/// The raw objects of one UVDM frame, starting with the VDM header.
pub type Objects = Vec<u32, MAX_DATA_OBJECTS>;

/// Short or long transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataType {
    /// At most one byte, carried in the UVDM header.
    Short,
    /// Chunked transfer.
    Long,
}

impl From<bool> for DataType {
    fn from(value: bool) -> Self {
        if value { Self::Long } else { Self::Short }
    }
}

impl From<DataType> for bool {
    fn from(value: DataType) -> Self {
        matches!(value, DataType::Long)
    }
}

/// Request (data or intent) or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CommandType {
    /// Carries data, or asks for data.
    Request,
    /// Answers a request.
    Response,
}

impl From<bool> for CommandType {
    fn from(value: bool) -> Self {
        if value { Self::Response } else { Self::Request }
    }
}

impl From<CommandType> for bool {
    fn from(value: CommandType) -> Self {
        matches!(value, CommandType::Response)
    }
}

/// The answer to a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Response {
    /// Accepted.
    Ack,
    /// Rejected.
    Nak,
    /// Not ready.
    Busy,
    /// Reserved encoding.
    Reserved,
}

impl From<u8> for Response {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::Ack,
            1 => Self::Nak,
            2 => Self::Busy,
            _ => Self::Reserved,
        }
    }
}

impl From<Response> for u8 {
    fn from(value: Response) -> Self {
        match value {
            Response::Ack => 0,
            Response::Nak => 1,
            Response::Busy => 2,
            Response::Reserved => 3,
        }
    }
}

bitfield! {
    /// The UVDM header, object 1 of every frame.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct UvdmHeader(pub u32): Debug, FromStorage, IntoStorage {
        /// 1-based chunk sequence number
        pub sequence: u8 @ 16..=23,
        /// Set on the first chunk of a long transfer
        pub first_chunk: bool @ 15,
        /// Number of bytes in a short transfer (0 or 1)
        pub short_size: u8 @ 13..=14,
        /// Response code
        pub response: u8 [Response] @ 11..=12,
        /// Transfer direction
        pub direction: bool [Direction] @ 10,
        /// Request or response
        pub command_type: bool [CommandType] @ 9,
        /// Short or long transfer
        pub data_type: bool [DataType] @ 8,
        /// The byte of a short transfer, or the byte count of a chunk
        pub data: u8 @ 0..=7,
    }
}

bitfield! {
    /// The transfer header, object 2 of the first chunk.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct TransferHeader(pub u32): Debug, FromStorage, IntoStorage {
        /// Number of chunks in the transfer
        pub total_chunks: u8 @ 16..=23,
        /// Payload size in bytes
        pub total_size: u16 @ 0..=15,
    }
}

bitfield! {
    /// The tailer, last object of every chunk.
    #[derive(Clone, Copy, PartialEq, Eq)]
    #[cfg_attr(feature = "defmt", derive(defmt::Format))]
    pub struct Tailer(pub u32): Debug, FromStorage, IntoStorage {
        /// Checksum over the preceding four words
        pub checksum: u16 @ 0..=15,
    }
}

/// 16 bit wrapping sum over the little-endian bytes of `words`.
pub fn checksum(words: &[u32]) -> u16 {
    let mut bytes = [0u8; CHECKSUM_COUNT];
    LittleEndian::write_u32_into(&words[..CHECKSUM_COUNT / 4], &mut bytes);
    bytes.iter().fold(0u16, |sum, byte| sum.wrapping_add(u16::from(*byte)))
}

/// The number of chunks that a payload needs.
pub fn total_chunks(size: usize) -> usize {
    if size <= FIRST_CHUNK_BYTES {
        1
    } else {
        1 + (size - FIRST_CHUNK_BYTES).div_ceil(NORMAL_CHUNK_BYTES)
    }
}

fn frame(header: UvdmHeader, body: &[u32]) -> Objects {
    let mut objects = Objects::new();
    // At most seven objects are ever built.
    let _ = objects.push(VdmHeaderUnstructured::new(SAMSUNG_VID).into());
    let _ = objects.push(header.into());
    for word in body {
        let _ = objects.push(*word);
    }
    objects
}

fn request_header(direction: Direction, data_type: DataType) -> UvdmHeader {
    UvdmHeader(0)
        .with_direction(direction)
        .with_command_type(CommandType::Request)
        .with_data_type(data_type)
}

/// A short transfer of zero or one byte.
pub fn short_frame(direction: Direction, byte: Option<u8>) -> Objects {
    let header = request_header(direction, DataType::Short)
        .with_sequence(1)
        .with_short_size(byte.is_some() as u8)
        .with_data(byte.unwrap_or_default());
    frame(header, &[])
}

/// A request for the partner to start sending.
pub fn receive_intent() -> Objects {
    frame(request_header(Direction::In, DataType::Short), &[])
}

/// A response to a request.
pub fn response_frame(direction: Direction, sequence: u8, response: Response) -> Objects {
    let header = UvdmHeader(0)
        .with_direction(direction)
        .with_command_type(CommandType::Response)
        .with_response(response)
        .with_sequence(sequence);
    frame(header, &[])
}

/// One chunk of a long transfer, as produced by [`Segmenter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingChunk {
    /// 1-based sequence number.
    pub sequence: u8,
    /// Payload bytes carried by this chunk.
    pub len: usize,
    /// The frame.
    pub objects: Objects,
}

/// Splits a long payload into chunk frames.
pub struct Segmenter<'a> {
    direction: Direction,
    payload: &'a [u8],
    offset: usize,
    sequence: u8,
}

impl<'a> Segmenter<'a> {
    /// Segment a payload, which must not exceed [`MAX_PAYLOAD_SIZE`].
    pub fn new(direction: Direction, payload: &'a [u8]) -> Result<Self, UvdmError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(UvdmError::TooLarge);
        }

        Ok(Self {
            direction,
            payload,
            offset: 0,
            sequence: 0,
        })
    }
}

impl Iterator for Segmenter<'_> {
    type Item = OutgoingChunk;

    fn next(&mut self) -> Option<Self::Item> {
        let first = self.offset == 0;
        if !first && self.offset >= self.payload.len() {
            return None;
        }

        let capacity = if first { FIRST_CHUNK_BYTES } else { NORMAL_CHUNK_BYTES };
        let len = capacity.min(self.payload.len() - self.offset);
        let mut data = [0u8; NORMAL_CHUNK_BYTES];
        data[..len].copy_from_slice(&self.payload[self.offset..self.offset + len]);

        let mut body = [0u32; 5];
        if first {
            body[0] = TransferHeader(0)
                .with_total_size(self.payload.len() as u16)
                .with_total_chunks(total_chunks(self.payload.len()) as u8)
                .into();
            LittleEndian::read_u32_into(&data[..FIRST_CHUNK_BYTES], &mut body[1..4]);
        } else {
            LittleEndian::read_u32_into(&data, &mut body[..4]);
        }
        body[4] = Tailer(0).with_checksum(checksum(&body[..4])).into();

        self.sequence += 1;
        self.offset += len;

        let header = request_header(self.direction, DataType::Long)
            .with_sequence(self.sequence)
            .with_first_chunk(first)
            .with_data(len as u8);

        Some(OutgoingChunk {
            sequence: self.sequence,
            len,
            objects: frame(header, &body),
        })
    }
}

/// A received chunk of a long transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingChunk {
    /// The UVDM header.
    pub header: UvdmHeader,
    words: [u32; 4],
    tailer: Tailer,
}

impl IncomingChunk {
    /// Whether the checksum in the tailer matches the data words.
    pub fn verify(&self) -> Result<(), UvdmError> {
        if checksum(&self.words) == self.tailer.checksum() {
            Ok(())
        } else {
            Err(UvdmError::Checksum)
        }
    }

    /// The transfer header, on the first chunk.
    pub fn transfer_header(&self) -> Option<TransferHeader> {
        self.header.first_chunk().then_some(TransferHeader(self.words[0]))
    }

    /// The payload bytes, limited to the announced chunk byte count.
    pub fn data(&self) -> Vec<u8, NORMAL_CHUNK_BYTES> {
        let mut bytes = [0u8; NORMAL_CHUNK_BYTES];
        LittleEndian::write_u32_into(&self.words, &mut bytes);

        let (bytes, capacity) = if self.header.first_chunk() {
            (&bytes[4..], FIRST_CHUNK_BYTES)
        } else {
            (&bytes[..], NORMAL_CHUNK_BYTES)
        };
        let len = usize::from(self.header.data()).min(capacity);
        bytes[..len].iter().copied().collect()
    }
}

/// A decoded UVDM frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Chunk {
    /// A short transfer, or a receive intent when sent towards the accessory with no data.
    Short {
        /// Transfer direction.
        direction: Direction,
        /// The byte, if any.
        data: Option<u8>,
    },
    /// A chunk of a long transfer. Not yet verified.
    Long(IncomingChunk),
    /// A response.
    Response {
        /// Transfer direction.
        direction: Direction,
        /// The sequence number that is answered.
        sequence: u8,
        /// The response code.
        response: Response,
    },
}

/// Decode a UVDM frame.
pub fn parse(objects: &[u32]) -> Result<Chunk, UvdmError> {
    let [vdm, header, body @ ..] = objects else {
        return Err(UvdmError::Malformed);
    };

    if !matches!(VdmHeader::from(*vdm), VdmHeader::Unstructured(h) if h.standard_or_vid() == SAMSUNG_VID) {
        return Err(UvdmError::Malformed);
    }

    let header = UvdmHeader(*header);
    match (header.command_type(), header.data_type()) {
        (CommandType::Response, _) => Ok(Chunk::Response {
            direction: header.direction(),
            sequence: header.sequence(),
            response: header.response(),
        }),
        (CommandType::Request, DataType::Short) => Ok(Chunk::Short {
            direction: header.direction(),
            data: (header.short_size() > 0).then_some(header.data()),
        }),
        (CommandType::Request, DataType::Long) => match body {
            [a, b, c, d, tailer] => Ok(Chunk::Long(IncomingChunk {
                header,
                words: [*a, *b, *c, *d],
                tailer: Tailer(*tailer),
            })),
            _ => Err(UvdmError::Malformed),
        },
    }
}

/// Progress of a reassembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Progress {
    /// More chunks are expected.
    Pending,
    /// The payload is complete, with its total size.
    Complete(usize),
}

/// Reassembles verified chunks into a caller buffer.
///
/// Every chunk is checked for its checksum, sequence number and size before anything is copied.
pub struct Reassembler<'a> {
    buffer: &'a mut [u8],
    total_size: Option<usize>,
    received: usize,
    next_sequence: u8,
}

impl<'a> Reassembler<'a> {
    /// Create a reassembler that writes into `buffer`.
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            total_size: None,
            received: 0,
            next_sequence: 1,
        }
    }

    /// Bytes received so far.
    pub fn received(&self) -> usize {
        self.received
    }

    /// The total size announced by the first chunk.
    pub fn total_size(&self) -> Option<usize> {
        self.total_size
    }

    /// The sequence number that the next chunk must carry.
    pub fn next_sequence(&self) -> u8 {
        self.next_sequence
    }

    /// Verify and store a chunk.
    pub fn accept(&mut self, chunk: &IncomingChunk) -> Result<Progress, UvdmError> {
        chunk.verify()?;

        if chunk.header.sequence() != self.next_sequence {
            return Err(UvdmError::Sequence);
        }

        if let Some(transfer) = chunk.transfer_header() {
            if self.total_size.is_some() {
                return Err(UvdmError::Sequence);
            }
            let total_size = usize::from(transfer.total_size());
            if total_size > self.buffer.len() || total_size > MAX_PAYLOAD_SIZE {
                return Err(UvdmError::TooLarge);
            }
            if usize::from(transfer.total_chunks()) != total_chunks(total_size) {
                return Err(UvdmError::Malformed);
            }
            self.total_size = Some(total_size);
        }

        let Some(total_size) = self.total_size else {
            return Err(UvdmError::Sequence);
        };

        let data = chunk.data();
        if self.received + data.len() > total_size {
            return Err(UvdmError::Malformed);
        }

        self.buffer[self.received..self.received + data.len()].copy_from_slice(&data);
        self.received += data.len();
        self.next_sequence = self.next_sequence.wrapping_add(1);

        if self.received == total_size {
            Ok(Progress::Complete(total_size))
        } else if data.is_empty() {
            Err(UvdmError::Malformed)
        } else {
            Ok(Progress::Pending)
        }
    }
}
