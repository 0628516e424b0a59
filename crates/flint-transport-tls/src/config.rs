use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use flint_core::{CoreError, ErrorCategory, error::codes};
use rustls::{
    ClientConfig, RootCertStore, ServerConfig,
    crypto::{CryptoProvider, aws_lc_rs},
    server::{VerifierBuilderError, WebPkiClientVerifier},
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName, pem::PemObject};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::{
    context::{PeerVerification, RustlsContext, normalize_hash},
    engine::Role,
};

/// TLS 上下文的声明式配置。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 证书、信任锚、ALPN 与对端钉扎策略通常随部署变化，以 TOML 描述后可在不改代码的情况下轮换；
/// - 配置只描述“用什么”，装载 PEM 与构建引擎配置集中在 [`server_context`](Self::server_context)
///   与 [`client_context`](Self::client_context) 两个入口。
///
/// ## 契约（What）
/// - `certificate_chain`/`private_key`：PEM 文件路径，服务端必填，客户端可选（用于双向认证），
///   两者必须同时出现；
/// - `trusted_ca`：客户端必填；服务端配置后启用客户端证书校验；
/// - `require_client_certificate`：仅作用于服务端，要求对端证书，需同时配置 `trusted_ca`；
///   客户端上下文忽略该字段，服务端证书由 `rustls` 的 WebPKI 校验强制要求；
/// - `server_name`：客户端 SNI 与服务端证书名称校验所用名称，客户端必填；
/// - `verify_subject_alt_names`/`verify_certificate_hashes`：握手后附加校验，见 [`PeerVerification`]。
///
/// ## 风险与权衡（Trade-offs）
/// - 未知字段直接拒绝，拼写错误不会被静默忽略；
/// - 私钥以 PEM 明文读取，文件权限由部署侧保证。
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct TlsContextConfig {
    pub certificate_chain: Option<PathBuf>,
    pub private_key: Option<PathBuf>,
    pub trusted_ca: Option<PathBuf>,
    pub alpn_protocols: Vec<String>,
    pub server_name: Option<String>,
    pub require_client_certificate: bool,
    pub verify_subject_alt_names: Vec<String>,
    pub verify_certificate_hashes: Vec<String>,
}

/// 配置装载与校验错误。
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 读取配置文件失败。
    #[error("读取配置文件 {path} 失败: {source}")]
    Io { path: PathBuf, source: io::Error },
    /// TOML 语法或字段类型错误。
    #[error("解析 TLS 配置失败: {0}")]
    Toml(#[from] toml::de::Error),
    /// PEM 文件无法读取或解析。
    #[error("读取 PEM 文件 {path} 失败: {source}")]
    Pem {
        path: PathBuf,
        source: rustls_pki_types::pem::Error,
    },
    /// PEM 文件中没有证书。
    #[error("{0} 中没有任何证书")]
    EmptyCertificates(PathBuf),
    /// 缺少当前角色必需的字段。
    #[error("缺少必填字段 `{0}`")]
    Missing(&'static str),
    /// 证书链与私钥只配置了其中之一。
    #[error("`certificate_chain` 与 `private_key` 必须同时配置")]
    IncompleteIdentity,
    /// 证书指纹不是 64 位十六进制。
    #[error("证书指纹 `{0}` 不是 SHA-256 十六进制摘要")]
    InvalidCertificateHash(String),
    /// SNI 名称非法。
    #[error("服务器名称 `{0}` 非法")]
    InvalidServerName(String),
    /// `rustls` 拒绝了证书、私钥或协议配置。
    #[error("rustls 拒绝了该配置: {0}")]
    Rustls(#[from] rustls::Error),
    /// 客户端证书校验器构建失败。
    #[error("客户端证书校验器构建失败: {0}")]
    Verifier(#[from] VerifierBuilderError),
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::new(codes::TLS_CONFIG_INVALID, err.to_string())
            .with_category(ErrorCategory::Configuration)
            .with_cause(err)
    }
}

impl TlsContextConfig {
    /// 从 TOML 文本解析并校验。
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// 从 TOML 文件解析并校验。
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 与角色无关的静态校验。
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.certificate_chain.is_some() != self.private_key.is_some() {
            return Err(ConfigError::IncompleteIdentity);
        }
        for hash in &self.verify_certificate_hashes {
            let normalized = normalize_hash(hash);
            if normalized.len() != 64 || !normalized.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::InvalidCertificateHash(hash.clone()));
            }
        }
        if let Some(name) = &self.server_name {
            ServerName::try_from(name.as_str())
                .map_err(|_| ConfigError::InvalidServerName(name.clone()))?;
        }
        Ok(())
    }

    /// 指定角色在握手后执行的对端校验策略；`require_client_certificate` 只对服务端生效。
    pub fn peer_verification(&self, role: Role) -> PeerVerification {
        let require_certificate = role == Role::Responder && self.require_client_certificate;
        PeerVerification::new()
            .require_peer_certificate(require_certificate)
            .with_subject_alt_names(self.verify_subject_alt_names.iter().cloned())
            .with_certificate_hashes(&self.verify_certificate_hashes)
    }

    /// 构建只承载服务端角色的上下文。
    pub fn server_context(&self) -> flint_core::Result<RustlsContext> {
        let config = self.build_server_config()?;
        debug!(alpn = ?self.alpn_protocols, "tls server context built");
        Ok(RustlsContext::server(Arc::new(config))
            .with_verification(self.peer_verification(Role::Responder)))
    }

    /// 构建只承载客户端角色的上下文。
    pub fn client_context(&self) -> flint_core::Result<RustlsContext> {
        let (config, server_name) = self.build_client_config()?;
        debug!(server_name = ?server_name, "tls client context built");
        Ok(RustlsContext::client(Arc::new(config), server_name)
            .with_verification(self.peer_verification(Role::Initiator)))
    }

    /// 构建 `rustls` 服务端配置。
    pub fn build_server_config(&self) -> Result<ServerConfig, ConfigError> {
        self.validate()?;
        let chain = load_certificates(required(&self.certificate_chain, "certificate_chain")?)?;
        let key = load_private_key(required(&self.private_key, "private_key")?)?;
        let provider = crypto_provider();

        let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()?;
        let builder = match &self.trusted_ca {
            Some(path) => {
                let roots = Arc::new(load_roots(path)?);
                let verifier = WebPkiClientVerifier::builder_with_provider(roots, provider);
                let verifier = if self.require_client_certificate {
                    verifier.build()?
                } else {
                    verifier.allow_unauthenticated().build()?
                };
                builder.with_client_cert_verifier(verifier)
            }
            None if self.require_client_certificate => {
                return Err(ConfigError::Missing("trusted_ca"));
            }
            None => builder.with_no_client_auth(),
        };
        let mut config = builder.with_single_cert(chain, key)?;
        config.alpn_protocols = self.alpn();
        Ok(config)
    }

    /// 构建 `rustls` 客户端配置及其 SNI 名称。
    pub fn build_client_config(
        &self,
    ) -> Result<(ClientConfig, ServerName<'static>), ConfigError> {
        self.validate()?;
        let roots = load_roots(required(&self.trusted_ca, "trusted_ca")?)?;
        let name = self
            .server_name
            .as_ref()
            .ok_or(ConfigError::Missing("server_name"))?;
        let server_name = ServerName::try_from(name.clone())
            .map_err(|_| ConfigError::InvalidServerName(name.clone()))?;

        let builder = ClientConfig::builder_with_provider(crypto_provider())
            .with_safe_default_protocol_versions()?
            .with_root_certificates(roots);
        let mut config = match (&self.certificate_chain, &self.private_key) {
            (Some(chain), Some(key)) => {
                builder.with_client_auth_cert(load_certificates(chain)?, load_private_key(key)?)?
            }
            (None, None) => builder.with_no_client_auth(),
            _ => return Err(ConfigError::IncompleteIdentity),
        };
        config.alpn_protocols = self.alpn();
        Ok((config, server_name))
    }

    fn alpn(&self) -> Vec<Vec<u8>> {
        self.alpn_protocols
            .iter()
            .map(|proto| proto.as_bytes().to_vec())
            .collect()
    }
}

fn crypto_provider() -> Arc<CryptoProvider> {
    Arc::new(aws_lc_rs::default_provider())
}

fn required<'a>(value: &'a Option<PathBuf>, field: &'static str) -> Result<&'a Path, ConfigError> {
    value.as_deref().ok_or(ConfigError::Missing(field))
}

fn pem_error(path: &Path) -> impl FnOnce(rustls_pki_types::pem::Error) -> ConfigError + '_ {
    move |source| ConfigError::Pem {
        path: path.to_path_buf(),
        source,
    }
}

fn load_certificates(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let certs = CertificateDer::pem_file_iter(path)
        .map_err(pem_error(path))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(pem_error(path))?;
    if certs.is_empty() {
        return Err(ConfigError::EmptyCertificates(path.to_path_buf()));
    }
    Ok(certs)
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    PrivateKeyDer::from_pem_file(path).map_err(pem_error(path))
}

fn load_roots(path: &Path) -> Result<RootCertStore, ConfigError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certificates(path)? {
        roots.add(cert)?;
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_full_server_section() {
        let config = TlsContextConfig::from_toml_str(
            r#"
            certificate_chain = "/etc/flint/server.pem"
            private_key = "/etc/flint/server.key"
            trusted_ca = "/etc/flint/ca.pem"
            alpn_protocols = ["h2", "http/1.1"]
            require_client_certificate = true
            verify_subject_alt_names = ["client.flint.test"]
            verify_certificate_hashes = [
                "AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89:AB:CD:EF:01:23:45:67:89",
            ]
            "#,
        )
        .expect("合法配置");
        assert_eq!(config.alpn_protocols, vec!["h2", "http/1.1"]);
        assert!(config.require_client_certificate);
        assert!(!config.peer_verification(Role::Responder).is_permissive());
    }

    #[test]
    fn client_certificate_requirement_stays_on_the_server() {
        let config = TlsContextConfig::from_toml_str(
            r#"
            trusted_ca = "/etc/flint/ca.pem"
            server_name = "server.flint.test"
            require_client_certificate = true
            "#,
        )
        .expect("合法配置");
        assert!(!config.peer_verification(Role::Responder).is_permissive());
        assert!(config.peer_verification(Role::Initiator).is_permissive());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = TlsContextConfig::from_toml_str("alpn = [\"h2\"]").expect_err("未知字段");
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn identity_must_be_complete() {
        let err = TlsContextConfig::from_toml_str("certificate_chain = \"a.pem\"")
            .expect_err("缺少私钥");
        assert!(matches!(err, ConfigError::IncompleteIdentity));
    }

    #[test]
    fn malformed_hash_pins_are_rejected() {
        let err = TlsContextConfig::from_toml_str("verify_certificate_hashes = [\"abc\"]")
            .expect_err("指纹过短");
        assert!(matches!(err, ConfigError::InvalidCertificateHash(_)));
    }

    #[test]
    fn client_requires_trust_anchor_and_server_name() {
        let config = TlsContextConfig::default();
        let err = config.client_context().expect_err("缺少信任锚");
        assert_eq!(err.code(), codes::TLS_CONFIG_INVALID);
        assert_eq!(err.category(), ErrorCategory::Configuration);
        assert!(err.message().contains("trusted_ca"));
    }

    #[test]
    fn missing_pem_file_reports_its_path() {
        let config = TlsContextConfig {
            certificate_chain: Some(PathBuf::from("/nonexistent/flint/chain.pem")),
            private_key: Some(PathBuf::from("/nonexistent/flint/key.pem")),
            ..TlsContextConfig::default()
        };
        let err = config.build_server_config().expect_err("文件不存在");
        assert!(matches!(err, ConfigError::Pem { .. }));
        assert!(err.to_string().contains("/nonexistent/flint/chain.pem"));
    }
}
