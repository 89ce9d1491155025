//! Minimal SOCKS5 server side for dynamic port forwarding.
//!
//! Supports the CONNECT command with "no authentication" and IPv4,
//! domain name and IPv6 destinations (RFC 1928).

use std::net::{Ipv4Addr, Ipv6Addr};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{SessionError, SessionResult};

const SOCKS_VERSION: u8 = 0x05;
const NO_AUTHENTICATION: u8 = 0x00;
const NO_ACCEPTABLE_METHODS: u8 = 0xFF;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

pub(crate) const REPLY_SUCCEEDED: u8 = 0x00;
pub(crate) const REPLY_GENERAL_FAILURE: u8 = 0x01;
pub(crate) const REPLY_CONNECTION_REFUSED: u8 = 0x05;
const REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
const REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

/// Run the greeting and request phases, returning the CONNECT destination.
///
/// On a protocol error the matching failure reply has already been sent.
pub(crate) async fn negotiate<S>(stream: &mut S) -> SessionResult<(String, u16)>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    // VER(1) + NMETHODS(1) + METHODS(NMETHODS)
    let mut greeting = [0u8; 2];
    stream.read_exact(&mut greeting).await?;
    if greeting[0] != SOCKS_VERSION {
        return Err(SessionError::new(format!(
            "Invalid SOCKS version: {}",
            greeting[0]
        )));
    }

    let mut methods = vec![0u8; greeting[1] as usize];
    stream.read_exact(&mut methods).await?;

    if !methods.contains(&NO_AUTHENTICATION) {
        stream
            .write_all(&[SOCKS_VERSION, NO_ACCEPTABLE_METHODS])
            .await?;
        return Err(SessionError::new("No acceptable SOCKS authentication method"));
    }
    stream.write_all(&[SOCKS_VERSION, NO_AUTHENTICATION]).await?;

    // VER(1) + CMD(1) + RSV(1) + ATYP(1)
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(SessionError::new(format!(
            "Invalid SOCKS request version: {}",
            header[0]
        )));
    }
    if header[1] != CMD_CONNECT {
        reply(stream, REPLY_COMMAND_NOT_SUPPORTED).await?;
        return Err(SessionError::new(format!(
            "Unsupported SOCKS command: {}",
            header[1]
        )));
    }

    let host = match header[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let len = stream.read_u8().await? as usize;
            let mut domain = vec![0u8; len];
            stream.read_exact(&mut domain).await?;
            String::from_utf8_lossy(&domain).into_owned()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            Ipv6Addr::from(octets).to_string()
        }
        other => {
            reply(stream, REPLY_ADDRESS_TYPE_NOT_SUPPORTED).await?;
            return Err(SessionError::new(format!(
                "Unsupported SOCKS address type: {}",
                other
            )));
        }
    };
    let port = stream.read_u16().await?;

    Ok((host, port))
}

/// Send a reply with an unspecified IPv4 bind address.
pub(crate) async fn reply<S>(stream: &mut S, code: u8) -> SessionResult<()>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(&[SOCKS_VERSION, code, 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::{TcpListener, TcpStream};

    /// Run `negotiate` on the accepted side of a loopback connection.
    async fn serve_once() -> (TcpStream, tokio::task::JoinHandle<SessionResult<(String, u16)>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            negotiate(&mut stream).await
        });
        let client = TcpStream::connect(addr).await.unwrap();
        (client, server)
    }

    mod handshake {
        use super::*;

        #[tokio::test]
        async fn test_connect_ipv4() {
            let (mut client, server) = serve_once().await;
            client.write_all(&[5, 1, 0]).await.unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();
            assert_eq!(choice, [5, 0]);

            client
                .write_all(&[5, 1, 0, 1, 10, 0, 0, 7, 0x1F, 0x90])
                .await
                .unwrap();
            let (host, port) = server.await.unwrap().unwrap();
            assert_eq!(host, "10.0.0.7");
            assert_eq!(port, 8080);
        }

        #[tokio::test]
        async fn test_connect_domain() {
            let (mut client, server) = serve_once().await;
            client.write_all(&[5, 2, 2, 0]).await.unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();
            assert_eq!(choice, [5, 0]);

            let mut request = vec![5, 1, 0, 3, 11];
            request.extend_from_slice(b"db.internal");
            request.extend_from_slice(&5432u16.to_be_bytes());
            client.write_all(&request).await.unwrap();

            let (host, port) = server.await.unwrap().unwrap();
            assert_eq!(host, "db.internal");
            assert_eq!(port, 5432);
        }

        #[tokio::test]
        async fn test_rejects_when_no_auth_not_offered() {
            let (mut client, server) = serve_once().await;
            client.write_all(&[5, 1, 2]).await.unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();
            assert_eq!(choice, [5, 0xFF]);
            assert!(server.await.unwrap().is_err());
        }

        #[tokio::test]
        async fn test_rejects_bind_command() {
            let (mut client, server) = serve_once().await;
            client.write_all(&[5, 1, 0]).await.unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();

            client
                .write_all(&[5, 2, 0, 1, 127, 0, 0, 1, 0, 80])
                .await
                .unwrap();
            let mut response = [0u8; 10];
            client.read_exact(&mut response).await.unwrap();
            assert_eq!(response[1], 0x07);
            assert!(server.await.unwrap().is_err());
        }

        #[tokio::test]
        async fn test_rejects_unknown_address_type() {
            let (mut client, server) = serve_once().await;
            client.write_all(&[5, 1, 0]).await.unwrap();
            let mut choice = [0u8; 2];
            client.read_exact(&mut choice).await.unwrap();

            client.write_all(&[5, 1, 0, 9]).await.unwrap();
            let mut response = [0u8; 10];
            client.read_exact(&mut response).await.unwrap();
            assert_eq!(response[1], 0x08);
            assert!(server.await.unwrap().is_err());
        }

        #[tokio::test]
        async fn test_rejects_socks4() {
            let (mut client, server) = serve_once().await;
            client.write_all(&[4, 1]).await.unwrap();
            let err = server.await.unwrap().unwrap_err();
            assert!(err.to_string().contains("Invalid SOCKS version"));
        }
    }
}
