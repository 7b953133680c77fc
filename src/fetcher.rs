use std::{fmt, io::Read, str::FromStr, time::Duration};

use _model::Coordinate;
use anyhow::{bail, Context};
use clap::ValueEnum;
use thiserror::Error;
use ureq::{Agent, AgentBuilder};

const USER_AGENT: &str = concat!("dataset/", env!("CARGO_PKG_VERSION"));
const MAX_BODY: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("credentials rejected (HTTP {0})")]
    Auth(u16),
    #[error("rate limited by provider (HTTP 429)")]
    RateLimited,
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("not an image: {0}")]
    ImageDecode(String),
}

impl FetchError {
    fn from_status(code: u16) -> Self {
        match code {
            401 | 403 => Self::Auth(code),
            429 => Self::RateLimited,
            _ => Self::Status(code),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Size {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let (width, height) = s
            .split_once(['x', 'X'])
            .context("expected WIDTHxHEIGHT, e.g. 50x50")?;
        let size = Size {
            width: width.trim().parse()?,
            height: height.trim().parse()?,
        };
        if size.width == 0 || size.height == 0 {
            bail!("image size can't be zero: {s}");
        }
        Ok(size)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ImageFormat {
    #[value(alias = "jpeg")]
    Jpg,
    Png,
}

impl ImageFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ImageParams {
    pub size: Size,
    pub zoom: u8,
    pub format: ImageFormat,
}

impl Default for ImageParams {
    fn default() -> Self {
        Self {
            size: Size {
                width: 50,
                height: 50,
            },
            zoom: 19,
            format: ImageFormat::Jpg,
        }
    }
}

/// Something that can produce an image for a coordinate. One call, one
/// request: no retries.
pub trait ImageSource {
    fn fetch(&self, coordinate: Coordinate, params: &ImageParams) -> Result<Vec<u8>, FetchError>;
}

/// Google-style static map endpoint returning satellite imagery.
pub struct StaticMap {
    agent: Agent,
    base_url: String,
    api_key: String,
}

impl StaticMap {
    pub const DEFAULT_URL: &'static str = "https://maps.googleapis.com/maps/api/staticmap";
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            agent: agent(Self::DEFAULT_TIMEOUT),
            base_url: Self::DEFAULT_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = agent(timeout);
        self
    }
}

fn agent(timeout: Duration) -> Agent {
    AgentBuilder::new()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
}

impl ImageSource for StaticMap {
    fn fetch(&self, coordinate: Coordinate, params: &ImageParams) -> Result<Vec<u8>, FetchError> {
        let response = match self
            .agent
            .get(&self.base_url)
            .query(
                "center",
                &format!("{},{}", coordinate.latitude(), coordinate.longitude()),
            )
            .query("zoom", &params.zoom.to_string())
            .query("size", &params.size.to_string())
            .query("maptype", "satellite")
            .query("format", params.format.extension())
            .query("key", &self.api_key)
            .call()
        {
            Ok(x) => x,
            Err(ureq::Error::Status(code, _)) => return Err(FetchError::from_status(code)),
            // the transport error's Display includes the url, and with it the key
            Err(ureq::Error::Transport(e)) => {
                return Err(FetchError::Network(match e.message() {
                    Some(message) => format!("{}: {message}", e.kind()),
                    None => e.kind().to_string(),
                }))
            }
        };

        if response.status() != 200 {
            return Err(FetchError::Status(response.status()));
        }
        let content_type = response.content_type().to_string();
        if !content_type.starts_with("image/") {
            return Err(FetchError::ImageDecode(format!(
                "unexpected content type {content_type}"
            )));
        }

        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| FetchError::Network(e.to_string()))?;
        if bytes.len() as u64 > MAX_BODY {
            return Err(FetchError::ImageDecode("body too large".to_string()));
        }
        if bytes.is_empty() {
            return Err(FetchError::ImageDecode("empty body".to_string()));
        }

        Ok(bytes)
    }
}
