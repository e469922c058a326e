//! SOCKS5 wire format (RFC 1928, RFC 1929)

use crate::SocksError;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

pub const SOCKS_VERSION: u8 = 0x05;

const AUTH_VERSION: u8 = 0x01;
const AUTH_SUCCESS: u8 = 0x00;

const METHOD_NO_AUTH: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_NONE_ACCEPTABLE: u8 = 0xFF;

const CMD_CONNECT: u8 = 0x01;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Username/password presented by the client
///
/// Empty when the client negotiated "no authentication".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Target of a CONNECT request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ip(SocketAddr),
    Domain(String, u16),
}

impl TargetAddr {
    pub fn host(&self) -> String {
        match self {
            TargetAddr::Ip(addr) => addr.ip().to_string(),
            TargetAddr::Domain(domain, _) => domain.clone(),
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            TargetAddr::Ip(addr) => addr.port(),
            TargetAddr::Domain(_, port) => *port,
        }
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ip(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}

/// Reply codes sent in response to a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reply {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    ConnectionNotAllowed = 0x02,
    NetworkUnreachable = 0x03,
    HostUnreachable = 0x04,
    ConnectionRefused = 0x05,
    TtlExpired = 0x06,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

/// Run method selection and, when chosen, username/password sub-negotiation
///
/// Username/password is preferred when offered. Every credential pair is
/// accepted.
pub async fn negotiate_auth<S>(stream: &mut S) -> Result<Credentials, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream.read_exact(&mut header).await?;
    if header[0] != SOCKS_VERSION {
        return Err(SocksError::UnsupportedVersion(header[0]));
    }

    let mut methods = vec![0u8; header[1] as usize];
    stream.read_exact(&mut methods).await?;

    if methods.contains(&METHOD_USER_PASS) {
        stream.write_all(&[SOCKS_VERSION, METHOD_USER_PASS]).await?;
        read_user_pass(stream).await
    } else if methods.contains(&METHOD_NO_AUTH) {
        stream.write_all(&[SOCKS_VERSION, METHOD_NO_AUTH]).await?;
        Ok(Credentials::default())
    } else {
        stream
            .write_all(&[SOCKS_VERSION, METHOD_NONE_ACCEPTABLE])
            .await?;
        Err(SocksError::NoAcceptableMethod)
    }
}

async fn read_user_pass<S>(stream: &mut S) -> Result<Credentials, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let version = stream.read_u8().await?;
    if version != AUTH_VERSION {
        return Err(SocksError::UnsupportedAuthVersion(version));
    }

    let username = read_short_string(stream).await?;
    let password = read_short_string(stream).await?;

    stream.write_all(&[AUTH_VERSION, AUTH_SUCCESS]).await?;
    Ok(Credentials { username, password })
}

/// Read a length-prefixed field; non-UTF-8 bytes are replaced
async fn read_short_string<S>(stream: &mut S) -> Result<String, SocksError>
where
    S: AsyncRead + Unpin,
{
    let len = stream.read_u8().await? as usize;
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Read a request and return its target
///
/// Anything but CONNECT, and unknown address types, are answered with the
/// matching reply before the error is returned.
pub async fn read_request<S>(stream: &mut S) -> Result<TargetAddr, SocksError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream.read_exact(&mut header).await?;
    let [version, command, _reserved, address_type] = header;

    if version != SOCKS_VERSION {
        return Err(SocksError::UnsupportedVersion(version));
    }
    if command != CMD_CONNECT {
        write_reply(stream, Reply::CommandNotSupported).await?;
        return Err(SocksError::UnsupportedCommand(command));
    }

    let target = match address_type {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(Ipv4Addr::from(octets).into(), port))
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream.read_exact(&mut octets).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Ip(SocketAddr::new(Ipv6Addr::from(octets).into(), port))
        }
        ATYP_DOMAIN => {
            let domain = read_short_string(stream).await?;
            let port = stream.read_u16().await?;
            TargetAddr::Domain(domain, port)
        }
        other => {
            write_reply(stream, Reply::AddressTypeNotSupported).await?;
            return Err(SocksError::UnsupportedAddressType(other));
        }
    };

    Ok(target)
}

/// Send a reply with an unspecified IPv4 bound address
pub async fn write_reply<S>(stream: &mut S, reply: Reply) -> Result<(), SocksError>
where
    S: AsyncWrite + Unpin,
{
    let packet = [
        SOCKS_VERSION,
        reply as u8,
        0x00,
        ATYP_IPV4,
        0,
        0,
        0,
        0,
        0,
        0,
    ];
    stream.write_all(&packet).await?;
    stream.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_user_pass_preferred() {
        let (mut client, mut server) = duplex(256);

        client
            .write_all(&[0x05, 0x02, METHOD_NO_AUTH, METHOD_USER_PASS])
            .await
            .unwrap();
        client
            .write_all(&[0x01, 8, b'b', b'a', b's', b't', b'i', b'o', b'n', b'1'])
            .await
            .unwrap();
        client.write_all(&[2, b'2', b'2']).await.unwrap();

        let credentials = negotiate_auth(&mut server).await.unwrap();
        assert_eq!(
            credentials,
            Credentials {
                username: "bastion1".to_string(),
                password: "22".to_string(),
            }
        );

        let mut response = [0u8; 4];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, [0x05, METHOD_USER_PASS, 0x01, 0x00]);
    }

    #[tokio::test]
    async fn test_no_auth_fallback() {
        let (mut client, mut server) = duplex(64);
        client
            .write_all(&[0x05, 0x01, METHOD_NO_AUTH])
            .await
            .unwrap();

        let credentials = negotiate_auth(&mut server).await.unwrap();
        assert_eq!(credentials, Credentials::default());

        let mut response = [0u8; 2];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, [0x05, METHOD_NO_AUTH]);
    }

    #[tokio::test]
    async fn test_no_acceptable_method() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x05, 0x01, 0x01]).await.unwrap();

        let err = negotiate_auth(&mut server).await.unwrap_err();
        assert!(matches!(err, SocksError::NoAcceptableMethod));

        let mut response = [0u8; 2];
        client.read_exact(&mut response).await.unwrap();
        assert_eq!(response, [0x05, METHOD_NONE_ACCEPTABLE]);
    }

    #[tokio::test]
    async fn test_rejects_socks4() {
        let (mut client, mut server) = duplex(64);
        client.write_all(&[0x04, 0x01, 0x00]).await.unwrap();

        let err = negotiate_auth(&mut server).await.unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedVersion(0x04)));
    }

    #[tokio::test]
    async fn test_read_request_address_types() {
        let (mut client, mut server) = duplex(256);

        client
            .write_all(&[0x05, CMD_CONNECT, 0x00, ATYP_IPV4, 10, 0, 0, 5, 0x01, 0xBB])
            .await
            .unwrap();
        assert_eq!(
            read_request(&mut server).await.unwrap(),
            TargetAddr::Ip("10.0.0.5:443".parse().unwrap())
        );

        let mut domain = vec![0x05, CMD_CONNECT, 0x00, ATYP_DOMAIN, 11];
        domain.extend_from_slice(b"example.com");
        domain.extend_from_slice(&80u16.to_be_bytes());
        client.write_all(&domain).await.unwrap();
        let target = read_request(&mut server).await.unwrap();
        assert_eq!(target, TargetAddr::Domain("example.com".to_string(), 80));
        assert_eq!(target.to_string(), "example.com:80");

        let mut v6 = vec![0x05, CMD_CONNECT, 0x00, ATYP_IPV6];
        v6.extend_from_slice(&Ipv6Addr::LOCALHOST.octets());
        v6.extend_from_slice(&22u16.to_be_bytes());
        client.write_all(&v6).await.unwrap();
        let target = read_request(&mut server).await.unwrap();
        assert_eq!(target.host(), "::1");
        assert_eq!(target.port(), 22);
    }

    #[tokio::test]
    async fn test_bind_command_rejected() {
        let (mut client, mut server) = duplex(64);
        client
            .write_all(&[0x05, 0x02, 0x00, ATYP_IPV4, 10, 0, 0, 5, 0x01, 0xBB])
            .await
            .unwrap();

        let err = read_request(&mut server).await.unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedCommand(0x02)));

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], Reply::CommandNotSupported as u8);
    }

    #[tokio::test]
    async fn test_unknown_address_type_rejected() {
        let (mut client, mut server) = duplex(64);
        client
            .write_all(&[0x05, CMD_CONNECT, 0x00, 0x09])
            .await
            .unwrap();

        let err = read_request(&mut server).await.unwrap_err();
        assert!(matches!(err, SocksError::UnsupportedAddressType(0x09)));

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply[1], Reply::AddressTypeNotSupported as u8);
    }

    #[tokio::test]
    async fn test_write_reply_layout() {
        let (mut client, mut server) = duplex(64);
        write_reply(&mut server, Reply::HostUnreachable).await.unwrap();

        let mut reply = [0u8; 10];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x05, 0x04, 0x00, 0x01, 0, 0, 0, 0, 0, 0]);
    }
}
