//! Wire encoding for outbound commands.
//!
//! Every command is a text header terminated by `\n`. Commands that carry a
//! body follow the header with a 4-byte big-endian size and the body bytes.
//! MPUB's body is itself a 4-byte big-endian message count followed by one
//! length-prefixed payload per message:
//!
//! ```text
//! MPUB <topic>[ <partition>]\n
//! [u32 body size][u32 count]([u32 len][payload])*
//! ```
//!
//! The body-size field covers everything after itself:
//! `4 + Σ(4 + len(payload_i))`.
//!
//! Encoding is a pure function of the command; nothing here touches I/O.

use crate::command::{Command, Topic, MAGIC_V2};
use bytes::{BufMut, Bytes, BytesMut};
use skiff_core::error::{Result, SkiffError};

const NEWLINE: u8 = b'\n';

/// Encode `cmd` into a fresh buffer.
pub fn encode(cmd: &Command) -> Result<Bytes> {
    let mut out = BytesMut::with_capacity(encoded_len(cmd));
    encode_into(cmd, &mut out)?;
    Ok(out.freeze())
}

/// Encode `cmd`, appending to `out`.
///
/// On error nothing is appended.
pub fn encode_into(cmd: &Command, out: &mut BytesMut) -> Result<()> {
    match cmd {
        Command::Magic => out.extend_from_slice(MAGIC_V2),
        Command::Identify(body) => put_sized(out, b"IDENTIFY", body)?,
        Command::Auth(secret) => put_sized(out, b"AUTH", secret)?,
        Command::Sub { topic, channel } => put_sub(out, "SUB", topic, channel),
        Command::SubOrdered { topic, channel } => put_sub(out, "SUB_ORDERED", topic, channel),
        Command::Rdy(count) => put_line(out, &format!("RDY {count}")),
        Command::Fin(id) => put_id_line(out, b"FIN ", id, None),
        Command::Req { id, delay } => {
            let suffix = format!(" {}", delay.as_millis());
            put_id_line(out, b"REQ ", id, Some(suffix.as_bytes()));
        }
        Command::Touch(id) => put_id_line(out, b"TOUCH ", id, None),
        Command::Pub { topic, body } => {
            let header = format!("PUB {topic}");
            put_sized(out, header.as_bytes(), body)?;
        }
        Command::Mpub { topic, bodies } => put_mpub(out, topic, bodies)?,
        Command::Nop => put_line(out, "NOP"),
        Command::Cls => put_line(out, "CLS"),
    }
    Ok(())
}

/// Upper-bound estimate of the encoded size, for buffer preallocation.
pub fn encoded_len(cmd: &Command) -> usize {
    const HEADER_SLACK: usize = 64;
    match cmd {
        Command::Magic => MAGIC_V2.len(),
        Command::Identify(body) | Command::Auth(body) => HEADER_SLACK + 4 + body.len(),
        Command::Pub { topic, body } => HEADER_SLACK + topic.name().len() + 4 + body.len(),
        Command::Mpub { topic, bodies } => {
            HEADER_SLACK
                + topic.name().len()
                + 8
                + bodies.iter().map(|b| 4 + b.len()).sum::<usize>()
        }
        Command::Sub { topic, channel } | Command::SubOrdered { topic, channel } => {
            HEADER_SLACK + topic.name().len() + channel.len()
        }
        _ => HEADER_SLACK,
    }
}

/// Size of the MPUB body that follows the size field.
///
/// # Errors
///
/// Returns a protocol error if the body cannot be described by a u32.
pub fn mpub_body_size(bodies: &[Bytes]) -> Result<u32> {
    let total = bodies
        .iter()
        .try_fold(4usize, |acc, b| acc.checked_add(4)?.checked_add(b.len()))
        .ok_or_else(|| SkiffError::protocol("MPUB body size overflows usize"))?;
    u32::try_from(total)
        .map_err(|_| SkiffError::protocol(format!("MPUB body of {total} bytes exceeds u32")))
}

fn put_line(out: &mut BytesMut, line: &str) {
    out.extend_from_slice(line.as_bytes());
    out.put_u8(NEWLINE);
}

fn put_sub(out: &mut BytesMut, verb: &str, topic: &Topic, channel: &str) {
    let line = match topic.partition() {
        Some(p) => format!("{verb} {} {channel} {p}", topic.name()),
        None => format!("{verb} {} {channel}", topic.name()),
    };
    put_line(out, &line);
}

fn put_id_line(out: &mut BytesMut, verb: &[u8], id: &[u8; 16], suffix: Option<&[u8]>) {
    out.extend_from_slice(verb);
    out.extend_from_slice(id);
    if let Some(suffix) = suffix {
        out.extend_from_slice(suffix);
    }
    out.put_u8(NEWLINE);
}

fn put_sized(out: &mut BytesMut, header: &[u8], body: &[u8]) -> Result<()> {
    let size = u32::try_from(body.len()).map_err(|_| {
        SkiffError::protocol(format!("body of {} bytes exceeds u32", body.len()))
    })?;
    out.reserve(header.len() + 1 + 4 + body.len());
    out.extend_from_slice(header);
    out.put_u8(NEWLINE);
    out.put_u32(size);
    out.extend_from_slice(body);
    Ok(())
}

fn put_mpub(out: &mut BytesMut, topic: &Topic, bodies: &[Bytes]) -> Result<()> {
    let body_size = mpub_body_size(bodies)?;
    let count = u32::try_from(bodies.len())
        .map_err(|_| SkiffError::protocol("MPUB message count exceeds u32"))?;

    let header = format!("MPUB {topic}");
    out.reserve(header.len() + 1 + 4 + body_size as usize);
    out.extend_from_slice(header.as_bytes());
    out.put_u8(NEWLINE);
    out.put_u32(body_size);
    out.put_u32(count);
    for body in bodies {
        // Each length fits: the total already did.
        out.put_u32(body.len() as u32);
        out.extend_from_slice(body);
    }
    Ok(())
}
