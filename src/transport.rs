//! Request/response transport to the device.
//!
//! The device accepts one frame per HTTP `POST` to its root path and answers
//! with the reply frame as the response body. [`HttpTransport`] implements that;
//! anything else implementing [`Transport`] (including a plain closure) can
//! stand in for it.
use std::time::Duration;

/// Round-trip bound used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(3000);

/// Failure to get a reply frame from the device.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No reply from device within {0:?}")]
    Timeout(Duration),

    #[error("Device returned an empty reply")]
    EmptyResponse,

    #[cfg(feature = "http-transport")]
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Sends one request frame and returns the reply frame.
///
/// Implementations must not retry: a failed exchange is reported as-is.
pub trait Transport {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError>;
}

impl<F> Transport for F
where
    F: FnMut(&[u8]) -> Result<Vec<u8>, TransportError>,
{
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        self(request)
    }
}

/// Blocking HTTP transport with a fixed round-trip timeout.
#[cfg_attr(docsrs, doc(cfg(feature = "http-transport")))]
#[cfg(feature = "http-transport")]
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
    url: String,
    timeout: Duration,
}

#[cfg(feature = "http-transport")]
impl HttpTransport {
    /// Creates a transport for the device at `host` (`address` or `address:port`).
    pub fn new(host: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: format!("http://{host}/"),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[cfg(feature = "http-transport")]
impl Transport for HttpTransport {
    fn exchange(&mut self, request: &[u8]) -> Result<Vec<u8>, TransportError> {
        let response = self
            .client
            .post(&self.url)
            .body(request.to_vec())
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|err| {
                if err.is_timeout() {
                    TransportError::Timeout(self.timeout)
                } else {
                    TransportError::Http(err)
                }
            })?;
        let body = response.bytes()?;
        if body.is_empty() {
            return Err(TransportError::EmptyResponse);
        }
        log::trace!("{} -> {:02X?} <- {:02X?}", self.url, request, body.as_ref());
        Ok(body.to_vec())
    }
}

#[cfg(all(test, feature = "http-transport"))]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn url_from_host() {
        let transport = HttpTransport::new("192.168.1.50", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(transport.url(), "http://192.168.1.50/");
        assert_eq!(transport.timeout(), Duration::from_secs(3));

        let transport = HttpTransport::new("breezart.local:8080", DEFAULT_TIMEOUT).unwrap();
        assert_eq!(transport.url(), "http://breezart.local:8080/");
    }

    #[test]
    fn silent_device_times_out() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let host = listener.local_addr().unwrap().to_string();
        // Accepts the connection and never answers.
        std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            std::thread::sleep(Duration::from_secs(2));
            drop(stream);
        });

        let timeout = Duration::from_millis(300);
        let mut transport = HttpTransport::new(&host, timeout).unwrap();
        assert_matches!(
            transport.exchange(&[0; 12]),
            Err(TransportError::Timeout(elapsed)) if elapsed == timeout
        );
    }

    #[test]
    fn unreachable_device_is_a_transport_error() {
        // Nothing listens on the discard port of the loopback interface.
        let mut transport = HttpTransport::new("127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(transport.exchange(&[0; 12]).is_err());
    }
}
