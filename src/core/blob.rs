use std::{
    fmt::Debug,
    fs::{self, File},
    path::{Path, PathBuf},
};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{
    blocking::{Client, ClientBuilder},
    header, Method, StatusCode, Url,
};
use sha2::Sha256;
use thiserror::Error;
use tracing::{debug, info, trace};

pub(crate) const STORAGE_API_VERSION: &str = "2019-12-12";
/// Largest blob a single Put Blob request accepts for [`STORAGE_API_VERSION`].
pub(crate) const MAX_PUT_BLOB_SIZE: u64 = 5000 * 1024 * 1024;
const ARCHIVE_CONTENT_TYPE: &str = "application/x-tar";
const DEFAULT_ENDPOINT_SUFFIX: &str = "core.windows.net";

#[derive(Debug, Error)]
pub(crate) enum UploadError {
    #[error("No storage credentials found")]
    MissingCredentials,
    #[error("Storage account name is required with an account key or SAS token")]
    MissingAccountName,
    #[error("Invalid storage connection string: {0}")]
    InvalidConnectionString(String),
    #[error("Storage account key is not valid base64")]
    InvalidAccountKey(#[from] base64::DecodeError),
    #[error("Storage account key cannot be used for signing")]
    InvalidKeyLength(#[from] hmac::digest::InvalidLength),
    #[error("Invalid storage endpoint '{0}'")]
    InvalidEndpoint(String),
    #[error("Archive '{}' is {1} bytes, above the {2} byte single upload limit", .0.display())]
    TooLarge(PathBuf, u64, u64),
    #[error("Upload to '{url}' was rejected with status {status}{}", .code.as_ref().map(|code| format!(" ({})", code)).unwrap_or_default())]
    Rejected {
        url: String,
        status: StatusCode,
        code: Option<String>,
    },
    #[error("Failed to send upload request")]
    Http(#[from] reqwest::Error),
    #[error("Failed due to unexpected IO error")]
    IO(#[from] std::io::Error),
}

#[derive(Clone)]
pub(crate) enum StorageAuth {
    SharedKey(Vec<u8>),
    SasToken(String),
}

impl Debug for StorageAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageAuth::SharedKey(_) => write!(f, "SharedKey(<redacted>)"),
            StorageAuth::SasToken(_) => write!(f, "SasToken(<redacted>)"),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StorageCredentials {
    pub account: String,
    pub auth: StorageAuth,
    pub blob_endpoint: Option<String>,
}

impl StorageCredentials {
    /// Picks credentials the way the cloud CLI does: a connection string wins,
    /// then an account key, then a SAS token.
    pub fn resolve(
        connection_string: Option<&str>,
        account: Option<&str>,
        account_key: Option<&str>,
        sas_token: Option<&str>,
    ) -> Result<StorageCredentials, UploadError> {
        if let Some(connection_string) = connection_string.filter(|value| !value.trim().is_empty()) {
            return StorageCredentials::from_connection_string(connection_string);
        }
        let account_key = account_key.filter(|value| !value.trim().is_empty());
        let sas_token = sas_token.filter(|value| !value.trim().is_empty());
        if account_key.is_none() && sas_token.is_none() {
            return Err(UploadError::MissingCredentials);
        }
        let account = account
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(UploadError::MissingAccountName)?;
        let auth = match (account_key, sas_token) {
            (Some(key), _) => StorageAuth::SharedKey(BASE64.decode(key.trim())?),
            (None, Some(token)) => StorageAuth::SasToken(normalize_sas_token(token)),
            (None, None) => return Err(UploadError::MissingCredentials),
        };
        Ok(StorageCredentials {
            account: account.to_string(),
            auth,
            blob_endpoint: None,
        })
    }

    pub fn from_connection_string(value: &str) -> Result<StorageCredentials, UploadError> {
        let mut account = None;
        let mut account_key = None;
        let mut sas_token = None;
        let mut blob_endpoint = None;
        let mut protocol = None;
        let mut endpoint_suffix = None;
        for part in value.split(';').map(str::trim).filter(|part| !part.is_empty()) {
            let (key, value) = part.split_once('=').ok_or_else(|| {
                UploadError::InvalidConnectionString(format!("expected key=value, found '{}'", part))
            })?;
            match key.trim() {
                k if k.eq_ignore_ascii_case("AccountName") => account = Some(value.trim()),
                k if k.eq_ignore_ascii_case("AccountKey") => account_key = Some(value.trim()),
                k if k.eq_ignore_ascii_case("SharedAccessSignature") => sas_token = Some(value.trim()),
                k if k.eq_ignore_ascii_case("BlobEndpoint") => blob_endpoint = Some(value.trim()),
                k if k.eq_ignore_ascii_case("DefaultEndpointsProtocol") => protocol = Some(value.trim()),
                k if k.eq_ignore_ascii_case("EndpointSuffix") => endpoint_suffix = Some(value.trim()),
                other => trace!("Ignoring connection string setting '{}'", other),
            }
        }
        let account = account.ok_or_else(|| {
            UploadError::InvalidConnectionString(String::from("missing AccountName"))
        })?;
        let auth = match (account_key, sas_token) {
            (Some(key), _) => StorageAuth::SharedKey(BASE64.decode(key)?),
            (None, Some(token)) => StorageAuth::SasToken(normalize_sas_token(token)),
            (None, None) => {
                return Err(UploadError::InvalidConnectionString(String::from(
                    "missing AccountKey or SharedAccessSignature",
                )))
            }
        };
        let blob_endpoint = match (blob_endpoint, protocol, endpoint_suffix) {
            (Some(endpoint), _, _) => Some(endpoint.to_string()),
            (None, None, None) => None,
            (None, protocol, suffix) => Some(format!(
                "{}://{}.blob.{}",
                protocol.unwrap_or("https"),
                account,
                suffix.unwrap_or(DEFAULT_ENDPOINT_SUFFIX)
            )),
        };
        Ok(StorageCredentials {
            account: account.to_string(),
            auth,
            blob_endpoint,
        })
    }

    pub fn default_endpoint(&self) -> String {
        format!("https://{}.blob.{}", self.account, DEFAULT_ENDPOINT_SUFFIX)
    }
}

fn normalize_sas_token(token: &str) -> String {
    token.trim().trim_start_matches('?').to_string()
}

/// Builds the Shared Key string-to-sign for a blob service request.
pub(crate) fn shared_key_string_to_sign(
    method: &Method,
    content_length: u64,
    content_type: &str,
    ms_headers: &[(&str, &str)],
    account: &str,
    url: &Url,
) -> String {
    let content_length = if content_length == 0 {
        String::new()
    } else {
        content_length.to_string()
    };
    let mut canonical_headers = ms_headers
        .iter()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.trim().to_string()))
        .collect::<Vec<_>>();
    canonical_headers.sort();
    let canonical_headers = canonical_headers
        .into_iter()
        .map(|(name, value)| format!("{}:{}\n", name, value))
        .collect::<String>();

    let mut canonical_resource = format!("/{}{}", account, url.path());
    let mut query = url
        .query_pairs()
        .map(|(name, value)| (name.to_ascii_lowercase(), value.into_owned()))
        .collect::<Vec<_>>();
    query.sort();
    for (name, value) in query {
        canonical_resource.push_str(&format!("\n{}:{}", name, value));
    }

    [
        method.as_str(),
        "", // Content-Encoding
        "", // Content-Language
        content_length.as_str(),
        "", // Content-MD5
        content_type,
        "", // Date
        "", // If-Modified-Since
        "", // If-Match
        "", // If-None-Match
        "", // If-Unmodified-Since
        "", // Range
    ]
    .join("\n")
        + "\n"
        + &canonical_headers
        + &canonical_resource
}

pub(crate) fn shared_key_signature(key: &[u8], string_to_sign: &str) -> Result<String, UploadError> {
    let mut mac = Hmac::<Sha256>::new_from_slice(key)?;
    mac.update(string_to_sign.as_bytes());
    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

pub(crate) struct BlobClient {
    client: Client,
    credentials: StorageCredentials,
    endpoint: Url,
}

impl BlobClient {
    pub fn new(
        credentials: StorageCredentials,
        endpoint_override: Option<&str>,
    ) -> Result<BlobClient, UploadError> {
        BlobClient::with_client(ClientBuilder::new().build()?, credentials, endpoint_override)
    }

    fn with_client(
        client: Client,
        credentials: StorageCredentials,
        endpoint_override: Option<&str>,
    ) -> Result<BlobClient, UploadError> {
        let endpoint = endpoint_override
            .map(str::to_string)
            .or_else(|| credentials.blob_endpoint.clone())
            .unwrap_or_else(|| credentials.default_endpoint());
        let endpoint =
            Url::parse(&endpoint).map_err(|_| UploadError::InvalidEndpoint(endpoint.clone()))?;
        if endpoint.cannot_be_a_base() {
            return Err(UploadError::InvalidEndpoint(endpoint.to_string()));
        }
        Ok(BlobClient {
            client,
            credentials,
            endpoint,
        })
    }

    pub fn blob_url(&self, container: &str, blob: &str) -> Result<Url, UploadError> {
        let mut url = self.endpoint.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| UploadError::InvalidEndpoint(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(container)
            .extend(blob.split('/'));
        Ok(url)
    }

    /// Uploads a file as a block blob with a single Put Blob request and
    /// returns the blob URL, without any SAS token.
    pub fn upload_file(
        &self,
        path: impl AsRef<Path>,
        container: &str,
        blob: &str,
    ) -> Result<Url, UploadError> {
        let content_length = fs::metadata(path.as_ref())?.len();
        if content_length > MAX_PUT_BLOB_SIZE {
            return Err(UploadError::TooLarge(
                path.as_ref().to_path_buf(),
                content_length,
                MAX_PUT_BLOB_SIZE,
            ));
        }
        let blob_url = self.blob_url(container, blob)?;
        let mut request_url = blob_url.clone();
        let date = Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        let ms_headers = [
            ("x-ms-blob-type", "BlockBlob"),
            ("x-ms-date", date.as_str()),
            ("x-ms-version", STORAGE_API_VERSION),
        ];

        let authorization = match &self.credentials.auth {
            StorageAuth::SharedKey(key) => {
                let string_to_sign = shared_key_string_to_sign(
                    &Method::PUT,
                    content_length,
                    ARCHIVE_CONTENT_TYPE,
                    &ms_headers,
                    &self.credentials.account,
                    &request_url,
                );
                trace!("Signing upload request: {:?}", string_to_sign);
                Some(format!(
                    "SharedKey {}:{}",
                    self.credentials.account,
                    shared_key_signature(key, &string_to_sign)?
                ))
            }
            StorageAuth::SasToken(token) => {
                request_url.set_query(Some(token));
                None
            }
        };

        let mut request = self
            .client
            .request(Method::PUT, request_url)
            .header(header::CONTENT_TYPE, ARCHIVE_CONTENT_TYPE)
            .header(header::CONTENT_LENGTH, content_length);
        for (name, value) in ms_headers {
            request = request.header(name, value);
        }
        if let Some(authorization) = authorization {
            request = request.header(header::AUTHORIZATION, authorization);
        }

        info!(target: "user-log", "Uploading {} ({} bytes) to {}", path.as_ref().display(), content_length, blob_url);
        let response = request.body(File::open(path.as_ref())?).send()?;
        let status = response.status();
        if status.is_success() {
            debug!("Upload to {} completed with status {}", blob_url, status);
            Ok(blob_url)
        } else {
            let code = response
                .headers()
                .get("x-ms-error-code")
                .and_then(|value| value.to_str().ok())
                .map(str::to_string);
            Err(UploadError::Rejected {
                url: blob_url.to_string(),
                status,
                code,
            })
        }
    }
}
