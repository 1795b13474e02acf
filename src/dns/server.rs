//! The UDP and TCP DNS listeners.
//!
//! Both listeners decode queries, run them through the shared
//! [`Pipeline`](crate::dns::Pipeline) and write back whatever it returns.
//! Each datagram or connection is handled on its own task so a slow
//! upstream never stalls the listener.

use std::io;
use std::sync::Arc;

use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tracing::{debug, info, warn};

use crate::dns::{Pipeline, Resolve, MAX_UDP_DNS_SIZE};
use crate::error::Result;

/// Serve DNS over UDP until the socket fails fatally.
pub async fn run_udp<R: Resolve>(socket: UdpSocket, pipeline: Arc<Pipeline<R>>) -> Result<()> {
    let socket = Arc::new(socket);
    info!(addr = %socket.local_addr()?, "DNS/UDP listener started");

    let mut buf = [0u8; MAX_UDP_DNS_SIZE];
    loop {
        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(err) => {
                warn!(error = %err, "UDP receive failed");
                continue;
            }
        };

        let packet = buf[..len].to_vec();
        let socket = Arc::clone(&socket);
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            let query = match Message::from_bytes(&packet) {
                Ok(query) => query,
                Err(err) => {
                    debug!(peer = %peer, error = %err, "undecodable query");
                    return;
                }
            };

            let Some(response) = pipeline.answer(query).await else {
                return;
            };

            match response.to_bytes() {
                Ok(bytes) => {
                    if let Err(err) = socket.send_to(&bytes, peer).await {
                        debug!(peer = %peer, error = %err, "failed to send response");
                    }
                }
                Err(err) => debug!(error = %err, "failed to encode response"),
            }
        });
    }
}

/// Serve DNS over TCP until the listener fails fatally.
pub async fn run_tcp<R: Resolve>(listener: TcpListener, pipeline: Arc<Pipeline<R>>) -> Result<()> {
    info!(addr = %listener.local_addr()?, "DNS/TCP listener started");

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                warn!(error = %err, "TCP accept failed");
                continue;
            }
        };

        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if let Err(err) = serve_stream(stream, pipeline).await {
                debug!(peer = %peer, error = %err, "TCP connection ended with error");
            }
        });
    }
}

/// Handle one TCP connection: length-framed queries until EOF.
async fn serve_stream<R: Resolve>(
    mut stream: TcpStream,
    pipeline: Arc<Pipeline<R>>,
) -> io::Result<()> {
    loop {
        let mut len_buf = [0u8; 2];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == io::ErrorKind::UnexpectedEof => break,
            Err(err) => return Err(err),
        }
        let len = usize::from(u16::from_be_bytes(len_buf));
        if len == 0 {
            continue;
        }

        let mut payload = vec![0u8; len];
        stream.read_exact(&mut payload).await?;

        let Ok(query) = Message::from_bytes(&payload) else {
            continue;
        };
        let Some(response) = pipeline.answer(query).await else {
            continue;
        };
        let Ok(bytes) = response.to_bytes() else {
            continue;
        };
        if bytes.len() >= usize::from(u16::MAX) {
            continue;
        }

        stream.write_u16(bytes.len() as u16).await?;
        stream.write_all(&bytes).await?;
        stream.flush().await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;

    use hickory_proto::op::Query;
    use hickory_proto::rr::{Name, RecordType};

    use crate::dns::resolver::tests::MockUpstream;
    use crate::dns::SpoofTarget;
    use crate::store::Store;

    fn test_pipeline() -> Arc<Pipeline<MockUpstream>> {
        let store = Arc::new(Store::new(Duration::from_secs(300)));
        store.hosts.add("tracker.example");
        Arc::new(Pipeline::new(
            store,
            MockUpstream::new(),
            SpoofTarget::from_ip("127.0.0.1".parse().unwrap()),
            60,
        ))
    }

    fn query_bytes(domain: &str) -> Vec<u8> {
        let mut q = Query::new();
        q.set_name(Name::from_str(domain).unwrap());
        q.set_query_type(RecordType::A);
        let mut message = Message::new();
        message.set_id(7);
        message.add_query(q);
        message.to_bytes().unwrap()
    }

    #[tokio::test]
    async fn should_answer_over_udp() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(run_udp(socket, test_pipeline()));

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(&query_bytes("tracker.example"), addr).await.unwrap();

        let mut buf = [0u8; MAX_UDP_DNS_SIZE];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), client.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let response = Message::from_bytes(&buf[..len]).unwrap();
        assert_eq!(response.id(), 7);
        assert_eq!(response.answers().len(), 1);
    }

    #[tokio::test]
    async fn should_answer_over_tcp_with_length_framing() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(run_tcp(listener, test_pipeline()));

        let mut client = TcpStream::connect(addr).await.unwrap();
        let query = query_bytes("tracker.example");
        client.write_u16(query.len() as u16).await.unwrap();
        client.write_all(&query).await.unwrap();

        let len = tokio::time::timeout(Duration::from_secs(2), client.read_u16())
            .await
            .unwrap()
            .unwrap();
        let mut payload = vec![0u8; usize::from(len)];
        client.read_exact(&mut payload).await.unwrap();

        let response = Message::from_bytes(&payload).unwrap();
        assert_eq!(response.id(), 7);
        assert_eq!(response.answers().len(), 1);
    }
}
