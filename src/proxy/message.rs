//! EIP-4361 ("Sign-In with Ethereum") plaintext messages
//!
//! The enhanced signature request binds a signature to a domain, chain, and
//! expiry. Wire format, line by line: domain header; address; blank;
//! statement; blank; then `URI:`, `Version:`, `Chain ID:`, `Nonce:`,
//! `Issued At:`, `Expiration Time:`.

pub const SIWE_STATEMENT: &str = "Arbius Wallet wants you to create a deterministic wallet";
pub const SIWE_VERSION: &str = "1";

const DOMAIN_HEADER_SUFFIX: &str = "wants you to sign in with your Ethereum account:";

/// Fields of an EIP-4361 message
#[derive(Debug, Clone)]
pub struct SiweMessage {
    pub domain: String,
    pub address: String,
    pub statement: String,
    pub uri: String,
    pub version: String,
    pub chain_id: u64,
    pub nonce: String,
    pub issued_at: String,
    pub expiration_time: Option<String>,
}

impl SiweMessage {
    /// Render the plaintext block presented to the signer
    pub fn render(&self) -> String {
        let mut out = format!(
            "{domain} {header}\n{address}\n\n{statement}\n\nURI: {uri}\nVersion: {version}\nChain ID: {chain_id}\nNonce: {nonce}\nIssued At: {issued_at}",
            domain = self.domain,
            header = DOMAIN_HEADER_SUFFIX,
            address = self.address,
            statement = self.statement,
            uri = self.uri,
            version = self.version,
            chain_id = self.chain_id,
            nonce = self.nonce,
            issued_at = self.issued_at,
        );
        if let Some(expiration) = &self.expiration_time {
            out.push_str(&format!("\nExpiration Time: {}", expiration));
        }
        out
    }
}

/// Whether a message already carries every EIP-4361 marker
pub fn is_eip4361(message: &str) -> bool {
    const REQUIRED: [&str; 6] = [
        DOMAIN_HEADER_SUFFIX,
        "URI:",
        "Version:",
        "Chain ID:",
        "Nonce:",
        "Issued At:",
    ];
    REQUIRED.iter().all(|marker| message.contains(marker))
}

/// Pull the nonce id out of a formatted message
pub fn extract_nonce(message: &str) -> Option<String> {
    message
        .lines()
        .find_map(|line| line.strip_prefix("Nonce:"))
        .map(|rest| rest.trim().to_string())
        .filter(|nonce| !nonce.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SiweMessage {
        SiweMessage {
            domain: "arbius.ai".into(),
            address: "0xabc".into(),
            statement: SIWE_STATEMENT.into(),
            uri: "https://arbius.ai".into(),
            version: SIWE_VERSION.into(),
            chain_id: 42_161,
            nonce: "nonce-123".into(),
            issued_at: "2026-01-01T00:00:00+00:00".into(),
            expiration_time: Some("2026-01-01T00:05:00+00:00".into()),
        }
    }

    #[test]
    fn test_render_wire_format() {
        let rendered = sample().render();
        let expected = "arbius.ai wants you to sign in with your Ethereum account:\n\
                        0xabc\n\
                        \n\
                        Arbius Wallet wants you to create a deterministic wallet\n\
                        \n\
                        URI: https://arbius.ai\n\
                        Version: 1\n\
                        Chain ID: 42161\n\
                        Nonce: nonce-123\n\
                        Issued At: 2026-01-01T00:00:00+00:00\n\
                        Expiration Time: 2026-01-01T00:05:00+00:00";
        assert_eq!(rendered, expected);
    }

    #[test]
    fn test_render_without_expiration() {
        let mut msg = sample();
        msg.expiration_time = None;
        assert!(!msg.render().contains("Expiration Time:"));
    }

    #[test]
    fn test_rendered_message_detects_as_eip4361() {
        assert!(is_eip4361(&sample().render()));
    }

    #[test]
    fn test_plain_message_is_not_eip4361() {
        assert!(!is_eip4361("please sign this"));
        // A partial set of markers is not enough
        assert!(!is_eip4361("URI: x\nVersion: 1\nNonce: y"));
    }

    #[test]
    fn test_extract_nonce() {
        assert_eq!(
            extract_nonce(&sample().render()),
            Some("nonce-123".to_string())
        );
        assert_eq!(extract_nonce("no nonce here"), None);
        assert_eq!(extract_nonce("Nonce:   "), None);
    }
}
