use std::{fmt, sync::Arc};

use flint_core::Result;
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use rustls_pki_types::{CertificateDer, ServerName};
use sha2::{Digest, Sha256};

use crate::{
    engine::{Role, TlsContext, TlsSession},
    error,
    session::RustlsSession,
};

/// 对端叶子证书 DER 的 SHA-256 小写十六进制编码。
pub fn certificate_digest(der: &[u8]) -> String {
    hex::encode(Sha256::digest(der))
}

/// 握手完成后对端身份的附加校验策略。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - `rustls` 的证书链校验回答“证书是否由可信 CA 签发”，代理还常需要回答“是不是我要的那一个”：
///   按 SAN 白名单或证书指纹钉住对端；
/// - 策略与引擎配置一起在配置阶段构建，握手热路径只做一次纯函数判断。
///
/// ## 契约（What）
/// - `require_peer_certificate`：对端必须出示证书；
/// - `subject_alt_names`：非空时，叶子证书必须对其中至少一个名称有效（DNS 名或 IP）；
/// - `certificate_hashes`：非空时，叶子证书指纹必须与其中之一相同；
/// - 对端未出示证书时，只有三项均未配置才算通过。
///
/// ## 风险与权衡（Trade-offs）
/// - SAN 校验复用 `webpki` 的名称匹配规则，通配符语义与 `rustls` 的服务端名校验保持一致；
/// - 指纹在构造时统一为去掉 `:` 的小写形式，比较时不再做大小写转换。
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PeerVerification {
    require_peer_certificate: bool,
    subject_alt_names: Vec<String>,
    certificate_hashes: Vec<String>,
}

impl PeerVerification {
    /// 不附加任何校验的策略。
    pub fn new() -> Self {
        Self::default()
    }

    /// 要求对端出示证书。
    pub fn require_peer_certificate(mut self, required: bool) -> Self {
        self.require_peer_certificate = required;
        self
    }

    /// 追加允许的 SAN。
    pub fn with_subject_alt_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subject_alt_names
            .extend(names.into_iter().map(Into::into));
        self
    }

    /// 追加允许的证书指纹，接受 `AB:CD:..` 与纯十六进制两种写法。
    pub fn with_certificate_hashes<I, S>(mut self, hashes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.certificate_hashes
            .extend(hashes.into_iter().map(|hash| normalize_hash(hash.as_ref())));
        self
    }

    /// 是否未配置任何附加校验。
    pub fn is_permissive(&self) -> bool {
        !self.require_peer_certificate
            && self.subject_alt_names.is_empty()
            && self.certificate_hashes.is_empty()
    }

    /// 对叶子证书执行策略判断。
    pub fn verify(&self, leaf: Option<&CertificateDer<'_>>) -> bool {
        let Some(leaf) = leaf else {
            return self.is_permissive();
        };
        if !self.subject_alt_names.is_empty() && !self.matches_subject_alt_name(leaf) {
            return false;
        }
        if !self.certificate_hashes.is_empty() {
            let digest = certificate_digest(leaf);
            if !self.certificate_hashes.iter().any(|pin| *pin == digest) {
                return false;
            }
        }
        true
    }

    fn matches_subject_alt_name(&self, leaf: &CertificateDer<'_>) -> bool {
        let Ok(cert) = webpki::EndEntityCert::try_from(leaf) else {
            return false;
        };
        self.subject_alt_names.iter().any(|name| {
            ServerName::try_from(name.as_str())
                .is_ok_and(|name| cert.verify_is_valid_for_subject_name(&name).is_ok())
        })
    }
}

pub(crate) fn normalize_hash(hash: &str) -> String {
    hash.chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// 基于 `rustls` 的 TLS 上下文。
///
/// # 意图（Why）
/// - 在配置阶段把服务端/客户端引擎配置与 [`PeerVerification`] 绑定在一起，
///   连接只通过 [`TlsContext`] 的两个方法使用它；
/// - 同一个上下文可以同时承载两种角色，供既接入又回源的代理复用。
///
/// # 契约（What）
/// - 某个角色未配置时，为该角色创建会话返回 `flint.transport.tls.role_unsupported`；
/// - 上下文不可变，需要替换时整体构建新实例（参见热更新容器）。
#[derive(Clone)]
pub struct RustlsContext {
    server: Option<Arc<ServerConfig>>,
    client: Option<(Arc<ClientConfig>, ServerName<'static>)>,
    verification: PeerVerification,
}

impl RustlsContext {
    /// 只承载服务端角色的上下文。
    pub fn server(config: Arc<ServerConfig>) -> Self {
        Self {
            server: Some(config),
            client: None,
            verification: PeerVerification::default(),
        }
    }

    /// 只承载客户端角色的上下文，`server_name` 用于 SNI 与服务端证书名称校验。
    pub fn client(config: Arc<ClientConfig>, server_name: ServerName<'static>) -> Self {
        Self {
            server: None,
            client: Some((config, server_name)),
            verification: PeerVerification::default(),
        }
    }

    /// 追加服务端角色。
    pub fn with_server(mut self, config: Arc<ServerConfig>) -> Self {
        self.server = Some(config);
        self
    }

    /// 追加客户端角色。
    pub fn with_client(
        mut self,
        config: Arc<ClientConfig>,
        server_name: ServerName<'static>,
    ) -> Self {
        self.client = Some((config, server_name));
        self
    }

    /// 设置对端校验策略。
    pub fn with_verification(mut self, verification: PeerVerification) -> Self {
        self.verification = verification;
        self
    }

    pub fn verification(&self) -> &PeerVerification {
        &self.verification
    }

    /// 是否装配了该角色所需的配置。
    pub fn supports(&self, role: Role) -> bool {
        match role {
            Role::Initiator => self.client.is_some(),
            Role::Responder => self.server.is_some(),
        }
    }
}

impl TlsContext for RustlsContext {
    type Session = RustlsSession;

    fn new_session(&self, role: Role) -> Result<RustlsSession> {
        match role {
            Role::Responder => {
                let config = self
                    .server
                    .as_ref()
                    .ok_or_else(|| error::role_unsupported(role))?;
                let conn = ServerConnection::new(Arc::clone(config))
                    .map_err(|err| error::session_error(role, err))?;
                Ok(RustlsSession::new(conn, role))
            }
            Role::Initiator => {
                let (config, server_name) = self
                    .client
                    .as_ref()
                    .ok_or_else(|| error::role_unsupported(role))?;
                let conn = ClientConnection::new(Arc::clone(config), server_name.clone())
                    .map_err(|err| error::session_error(role, err))?;
                Ok(RustlsSession::new(conn, role))
            }
        }
    }

    fn verify_peer(&self, session: &RustlsSession) -> bool {
        self.verification.verify(session.peer_certificate().as_ref())
    }
}

impl fmt::Debug for RustlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RustlsContext")
            .field("server", &self.server.is_some())
            .field("client", &self.client.as_ref().map(|(_, name)| name))
            .field("verification", &self.verification)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_lowercase_hex_sha256() {
        let digest = certificate_digest(b"abc");
        assert_eq!(
            digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hashes_are_normalized() {
        let policy = PeerVerification::new().with_certificate_hashes(["BA:78:16"]);
        assert_eq!(policy.certificate_hashes, vec!["ba7816".to_string()]);
    }

    #[test]
    fn missing_certificate_only_passes_a_permissive_policy() {
        assert!(PeerVerification::new().verify(None));
        assert!(
            !PeerVerification::new()
                .require_peer_certificate(true)
                .verify(None)
        );
        assert!(
            !PeerVerification::new()
                .with_subject_alt_names(["a.test"])
                .verify(None)
        );
    }

    #[test]
    fn hash_pin_is_compared_against_the_leaf_digest() {
        let leaf = CertificateDer::from(b"not really der".to_vec());
        let pin = certificate_digest(&leaf);
        assert!(
            PeerVerification::new()
                .with_certificate_hashes([pin.to_uppercase()])
                .verify(Some(&leaf))
        );
        assert!(
            !PeerVerification::new()
                .with_certificate_hashes(["00".repeat(32)])
                .verify(Some(&leaf))
        );
    }

    #[test]
    fn unparsable_leaf_never_matches_a_san_list() {
        let leaf = CertificateDer::from(b"garbage".to_vec());
        assert!(
            !PeerVerification::new()
                .with_subject_alt_names(["a.test"])
                .verify(Some(&leaf))
        );
    }
}
