//! Minimal SOCKS5 client (RFC 1928): no authentication, CONNECT only, domain-name target.

use tokio::io::{AsyncRead, AsyncReadExt as _, AsyncWrite, AsyncWriteExt as _};
use tokio::net::TcpStream;

use crate::config::Proxy;
use crate::error::TransportError;

const VERSION: u8 = 0x05;
const NO_AUTHENTICATION: u8 = 0x00;
const CONNECT: u8 = 0x01;
const RESERVED: u8 = 0x00;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;
const SUCCEEDED: u8 = 0x00;

/// Open a TCP stream to `proxy` and ask it to tunnel to `host:port`.
pub async fn connect(proxy: &Proxy, host: &str, port: u16) -> Result<TcpStream, TransportError> {
    let mut stream = TcpStream::connect(proxy.address()).await?;
    handshake(&mut stream, host, port).await?;
    Ok(stream)
}

/// Run the greeting and CONNECT exchange on an already open stream.
pub async fn handshake<S>(stream: &mut S, host: &str, port: u16) -> Result<(), TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let host_len = u8::try_from(host.len())
        .map_err(|_e| TransportError::Proxy(format!("host name too long: {host}")))?;

    stream
        .write_all(&[VERSION, 1, NO_AUTHENTICATION])
        .await?;

    let mut choice = [0_u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice != [VERSION, NO_AUTHENTICATION] {
        return Err(TransportError::Proxy(format!(
            "unsupported authentication method {:#04x}",
            choice[1]
        )));
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, CONNECT, RESERVED, ATYP_DOMAIN, host_len]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut reply = [0_u8; 4];
    stream.read_exact(&mut reply).await?;
    let [version, status, _, address_type] = reply;
    if version != VERSION {
        return Err(TransportError::Proxy(format!(
            "unexpected protocol version {version:#04x}"
        )));
    }
    if status != SUCCEEDED {
        return Err(TransportError::Proxy(format!(
            "connect rejected with status {status:#04x}"
        )));
    }

    // The bound address is of no use to a client; drain it along with the port.
    let address_len = match address_type {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => usize::from(stream.read_u8().await?),
        other => {
            return Err(TransportError::Proxy(format!(
                "unknown address type {other:#04x}"
            )));
        }
    };
    let mut bound = vec![0_u8; address_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}
