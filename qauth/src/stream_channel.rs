//! # stream_channel
//!
//! Send and receive `Message`s over a unix-type stream (a UnixStream,
//! a pipe, a socketpair).
//!
//! Every message travels as one frame: a 4-byte big-endian length,
//! followed by that many bytes of encoded message. The write side builds
//! the whole frame in memory, writes it in one go and flushes.
//!
//! There are two flavors. `send` / `recv` work on blocking `std::io`
//! streams and are what the helper uses. `send_async` / `recv_async` work
//! on tokio streams and are what the library side uses.
//!
//! Example over a socketpair:
//! ```text
//! let (mut a, mut b) = std::os::unix::net::UnixStream::pair()?;
//! stream_channel::send(&mut a, &HelperMsg::Hello { id: 1 })?;
//! let msg: Option<HelperMsg> = stream_channel::recv(&mut b)?;
//! ```
//!
use std::io::{self, Read, Write};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use zeroize::Zeroizing;

use crate::messages::{self, Message, ProtoError, MAX_MESSAGE_SIZE};

// Length header plus payload, in one buffer.
fn framed(data: &[u8]) -> Zeroizing<Vec<u8>> {
    let mut buf = Zeroizing::new(Vec::with_capacity(data.len() + 4));
    buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
    buf.extend_from_slice(data);
    buf
}

fn frame_len(hdr: [u8; 4]) -> Result<usize, ProtoError> {
    let len = u32::from_be_bytes(hdr) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtoError::TooLarge(len));
    }
    Ok(len)
}

fn body_error(e: io::Error) -> ProtoError {
    match e.kind() {
        io::ErrorKind::UnexpectedEof => ProtoError::Closed,
        _ => ProtoError::Io(e),
    }
}

/// Write one frame and flush.
pub fn write_frame<W: Write>(w: &mut W, data: &[u8]) -> io::Result<()> {
    w.write_all(&framed(data))?;
    w.flush()
}

/// Read one frame. Returns `None` on a clean end-of-file before the header;
/// end-of-file anywhere after its first byte is `ProtoError::Closed`.
pub fn read_frame<R: Read>(r: &mut R) -> Result<Option<Zeroizing<Vec<u8>>>, ProtoError> {
    let mut hdr = [0u8; 4];
    let mut got = 0;
    while got < hdr.len() {
        match r.read(&mut hdr[got..]) {
            Ok(0) if got == 0 => return Ok(None),
            Ok(0) => return Err(ProtoError::Closed),
            Ok(n) => got += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    let len = frame_len(hdr)?;
    let mut data = Zeroizing::new(vec![0u8; len]);
    r.read_exact(&mut data).map_err(body_error)?;
    Ok(Some(data))
}

/// Send a message over a blocking stream.
pub fn send<W: Write, M: Message>(w: &mut W, msg: &M) -> Result<(), ProtoError> {
    let body = Zeroizing::new(messages::encode(msg)?);
    write_frame(w, &body)?;
    Ok(())
}

/// Receive a message from a blocking stream. `None` means the other
/// side closed the connection.
pub fn recv<R: Read, M: Message>(r: &mut R) -> Result<Option<M>, ProtoError> {
    match read_frame(r)? {
        Some(data) => Ok(Some(messages::decode(&data)?)),
        None => Ok(None),
    }
}

/// Send a message over a tokio stream.
pub async fn send_async<W, M>(w: &mut W, msg: &M) -> Result<(), ProtoError>
where
    W: AsyncWrite + Unpin,
    M: Message,
{
    let body = Zeroizing::new(messages::encode(msg)?);
    w.write_all(&framed(&body)).await?;
    w.flush().await?;
    Ok(())
}

/// Receive a message from a tokio stream.
pub async fn recv_async<R, M>(r: &mut R) -> Result<Option<M>, ProtoError>
where
    R: AsyncRead + Unpin,
    M: Message,
{
    let mut hdr = [0u8; 4];
    let mut got = 0;
    while got < hdr.len() {
        match r.read(&mut hdr[got..]).await {
            Ok(0) if got == 0 => return Ok(None),
            Ok(0) => return Err(ProtoError::Closed),
            Ok(n) => got += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e.into()),
        }
    }
    let len = frame_len(hdr)?;
    let mut data = Zeroizing::new(vec![0u8; len]);
    r.read_exact(&mut data).await.map_err(body_error)?;
    Ok(Some(messages::decode(&data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{CallerMsg, HelperMsg};
    use crate::prompt::{Prompt, PromptType, Request};
    use std::os::unix::net::UnixStream;

    #[test]
    fn test_blocking_pair() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        send(&mut a, &HelperMsg::Hello { id: 42 }).unwrap();
        let req = Request::new(vec![Prompt::new(PromptType::LoginPassword, "Password:", true)]);
        send(&mut a, &HelperMsg::Request(req.clone())).unwrap();
        drop(a);

        let m: Option<HelperMsg> = recv(&mut b).unwrap();
        assert_eq!(m, Some(HelperMsg::Hello { id: 42 }));
        let m: Option<HelperMsg> = recv(&mut b).unwrap();
        assert_eq!(m, Some(HelperMsg::Request(req)));
        let m: Option<HelperMsg> = recv(&mut b).unwrap();
        assert!(m.is_none());
    }

    #[test]
    fn test_truncated_frame() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&[0, 0, 0, 10, 0, 0, 0, 6]).unwrap();
        drop(a);
        match recv::<_, CallerMsg>(&mut b) {
            Err(ProtoError::Closed) => {},
            r => panic!("expected Closed, got {:?}", r),
        }
    }

    #[test]
    fn test_truncated_header() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&[0, 0]).unwrap();
        drop(a);
        match recv::<_, CallerMsg>(&mut b) {
            Err(ProtoError::Closed) => {},
            r => panic!("expected Closed, got {:?}", r),
        }
    }

    #[tokio::test]
    async fn test_truncated_header_async() {
        let (mut a, mut b) = tokio::net::UnixStream::pair().unwrap();
        a.write_all(&[0, 0, 0]).await.unwrap();
        drop(a);
        match recv_async::<_, HelperMsg>(&mut b).await {
            Err(ProtoError::Closed) => {},
            r => panic!("expected Closed, got {:?}", r),
        }
    }

    #[test]
    fn test_write_frame_layout() {
        let mut buf = Vec::new();
        write_frame(&mut buf, b"abc").unwrap();
        assert_eq!(buf, vec![0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[test]
    fn test_oversized_frame() {
        let (mut a, mut b) = UnixStream::pair().unwrap();
        a.write_all(&[0x7f, 0, 0, 0]).unwrap();
        match recv::<_, CallerMsg>(&mut b) {
            Err(ProtoError::TooLarge(_)) => {},
            r => panic!("expected TooLarge, got {:?}", r),
        }
    }

    #[tokio::test]
    async fn test_async_pair() {
        let (mut a, mut b) = tokio::net::UnixStream::pair().unwrap();
        send_async(&mut a, &CallerMsg::SessionAck).await.unwrap();
        let m: Option<CallerMsg> = recv_async(&mut b).await.unwrap();
        assert_eq!(m, Some(CallerMsg::SessionAck));
        drop(a);
        let m: Option<CallerMsg> = recv_async(&mut b).await.unwrap();
        assert!(m.is_none());
    }

    #[test]
    fn test_blocking_to_async() {
        let (a, b) = UnixStream::pair().unwrap();
        let t = std::thread::spawn(move || {
            let mut a = a;
            send(&mut a, &HelperMsg::SessionStatus { success: true }).unwrap();
            let m: Option<CallerMsg> = recv(&mut a).unwrap();
            assert_eq!(m, Some(CallerMsg::SessionAck));
        });
        let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
        rt.block_on(async move {
            b.set_nonblocking(true).unwrap();
            let mut b = tokio::net::UnixStream::from_std(b).unwrap();
            let m: Option<HelperMsg> = recv_async(&mut b).await.unwrap();
            assert_eq!(m, Some(HelperMsg::SessionStatus { success: true }));
            send_async(&mut b, &CallerMsg::SessionAck).await.unwrap();
        });
        t.join().unwrap();
    }
}
