use crate::base::ClientId;
use log::{debug, error, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    runtime::Handle,
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
};
use voxel_net::{IoHandle, PacketBuffer};

/// A handle for asynchronously writing packets to a connection. While the time at which the
/// packets will be written cannot be guaranteed, packets are always written in the order they are
/// passed to this handle, and sending never blocks the caller.
#[derive(Clone, Debug)]
pub struct AsyncWriteHandle(UnboundedSender<WrappedPacket>);

impl AsyncWriteHandle {
    /// Creates a handle along with the receiving end that a writer task drains.
    pub fn channel() -> (Self, UnboundedReceiver<WrappedPacket>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (AsyncWriteHandle(sender), receiver)
    }

    /// Attempts to send the given wrapped packet. Returns false if the writer has shut down.
    fn try_send(&self, packet: WrappedPacket) -> bool {
        self.0.send(packet).is_ok()
    }

    /// Queues an encoded packet payload.
    pub fn send_buffer(&self, buffer: PacketBuffer) {
        if !self.try_send(WrappedPacket::Buffer(buffer)) {
            debug!("Dropped packet for closed connection");
        }
    }

    /// Closes the connection once everything queued before this call has been written.
    pub fn shutdown_connection(&self) {
        self.try_send(WrappedPacket::Disconnect);
    }

    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }
}

/// What a writer task is asked to do.
#[derive(Debug)]
pub enum WrappedPacket {
    /// An encoded packet payload.
    Buffer(PacketBuffer),
    /// Specifies that the connection should be closed.
    Disconnect,
}

/// Something that happened on a connection, reported to the thread that owns the session.
#[derive(Debug)]
pub enum ConnectionEvent {
    /// A new connection was accepted.
    Connected(AsyncWriteHandle),
    /// A complete frame arrived. The payload is decoded by the session, not by the transport.
    Frame(PacketBuffer),
    /// The transport closed, with the transport error if there was one.
    Closed(Option<String>),
}

/// A connection event and the id of the connection it came from.
#[derive(Debug)]
pub struct WrappedConnectionEvent {
    pub sender: ClientId,
    pub event: ConnectionEvent,
}

impl WrappedConnectionEvent {
    #[inline]
    pub fn new(sender: ClientId, event: ConnectionEvent) -> Self {
        WrappedConnectionEvent { sender, event }
    }
}

/// Splits the given stream into a reader task forwarding frames to `events` and a writer task
/// draining the returned handle. A `Connected` event carrying a clone of the handle is sent before
/// any frame.
pub fn spawn_connection<S>(
    rt: &Handle,
    id: ClientId,
    stream: S,
    io: IoHandle,
    events: UnboundedSender<WrappedConnectionEvent>,
) -> AsyncWriteHandle
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (mut reader, mut writer) = tokio::io::split(stream);
    let (handle, mut outbound) = AsyncWriteHandle::channel();

    let _ = events.send(WrappedConnectionEvent::new(
        id,
        ConnectionEvent::Connected(handle.clone()),
    ));

    rt.spawn(async move {
        while let Some(packet) = outbound.recv().await {
            match packet {
                WrappedPacket::Buffer(buffer) =>
                    if let Err(e) = io.write_frame(&mut writer, buffer.as_slice()).await {
                        warn!("Failed to send packet to connection {}: {}", id, e);
                        break;
                    },
                WrappedPacket::Disconnect => break,
            }
        }

        if let Err(e) = writer.shutdown().await {
            debug!("Failed to shut down connection {}: {}", id, e);
        }
    });

    rt.spawn(async move {
        let reason = loop {
            match io.read_frame(&mut reader).await {
                Ok(Some(buffer)) => {
                    if events
                        .send(WrappedConnectionEvent::new(id, ConnectionEvent::Frame(buffer)))
                        .is_err()
                    {
                        return;
                    }
                }
                Ok(None) => break None,
                Err(e) => {
                    error!("Failed to read frame from connection {}: {}", id, e);
                    break Some(e.to_string());
                }
            }
        };

        let _ = events.send(WrappedConnectionEvent::new(id, ConnectionEvent::Closed(reason)));
    });

    handle
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frames_cross_a_connection_in_order() {
        let (near, far) = duplex(4096);
        let (near_events, mut near_rx) = mpsc::unbounded_channel();
        let (far_events, mut far_rx) = mpsc::unbounded_channel();
        let rt = Handle::current();

        let near_handle = spawn_connection(&rt, 1, near, IoHandle::new(16), near_events);
        let _far_handle = spawn_connection(&rt, 2, far, IoHandle::new(-1), far_events);

        assert!(matches!(
            near_rx.recv().await.unwrap().event,
            ConnectionEvent::Connected(_)
        ));
        assert!(matches!(
            far_rx.recv().await.unwrap().event,
            ConnectionEvent::Connected(_)
        ));

        let big = vec![7u8; 1000];
        near_handle.send_buffer(PacketBuffer::from(&[1u8, 2, 3][..]));
        near_handle.send_buffer(PacketBuffer::from(big.clone()));
        near_handle.shutdown_connection();

        let mut received = Vec::new();
        loop {
            let event = far_rx.recv().await.unwrap();
            assert_eq!(event.sender, 2);
            match event.event {
                ConnectionEvent::Frame(buffer) => received.push(buffer.into_inner()),
                ConnectionEvent::Closed(reason) => {
                    assert_eq!(reason, None);
                    break;
                }
                ConnectionEvent::Connected(_) => panic!("Connected twice"),
            }
        }

        assert_eq!(received, vec![vec![1, 2, 3], big]);
    }
}
