//! `WWW-Authenticate` challenge parsing and credential computation.
//!
//! Supports `Basic` and `Digest` (RFC 7616, `MD5`, `MD5-sess`, `SHA-256`,
//! `SHA-256-sess`, `qop=auth` or no qop). Anything else is reported as
//! unusable so the caller can hand the original `401` back.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use md5::Md5;
use sha2::{Digest, Sha256};

/// Nonce count used for the single retry
const NONCE_COUNT: &str = "00000001";

/// Authentication scheme of one challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheme {
    Basic,
    Digest,
    Other(String),
}

impl Scheme {
    fn parse(token: &str) -> Self {
        if token.eq_ignore_ascii_case("basic") {
            Self::Basic
        } else if token.eq_ignore_ascii_case("digest") {
            Self::Digest
        } else {
            Self::Other(token.to_owned())
        }
    }
}

/// Digest hash algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Md5,
    Md5Sess,
    Sha256,
    Sha256Sess,
}

impl DigestAlgorithm {
    /// Absent `algorithm` means `MD5`. Unknown names yield `None`.
    #[must_use]
    pub fn from_param(value: Option<&str>) -> Option<Self> {
        let Some(value) = value else {
            return Some(Self::Md5);
        };
        match value.to_ascii_uppercase().as_str() {
            "MD5" => Some(Self::Md5),
            "MD5-SESS" => Some(Self::Md5Sess),
            "SHA-256" => Some(Self::Sha256),
            "SHA-256-SESS" => Some(Self::Sha256Sess),
            _ => None,
        }
    }

    fn is_session(self) -> bool {
        matches!(self, Self::Md5Sess | Self::Sha256Sess)
    }

    fn hash(self, input: &str) -> String {
        match self {
            Self::Md5 | Self::Md5Sess => hex::encode(Md5::digest(input.as_bytes())),
            Self::Sha256 | Self::Sha256Sess => hex::encode(Sha256::digest(input.as_bytes())),
        }
    }
}

/// One parsed challenge: scheme plus its auth-params (names lower-cased)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: Scheme,
    params: Vec<(String, String)>,
}

impl Challenge {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    #[must_use]
    pub fn realm(&self) -> Option<&str> {
        self.param("realm")
    }

    #[must_use]
    pub fn nonce(&self) -> Option<&str> {
        self.param("nonce")
    }

    #[must_use]
    pub fn opaque(&self) -> Option<&str> {
        self.param("opaque")
    }

    #[must_use]
    pub fn qop(&self) -> Option<&str> {
        self.param("qop")
    }

    #[must_use]
    pub fn algorithm(&self) -> Option<&str> {
        self.param("algorithm")
    }

    /// `Authorization` value answering this challenge, or `None` when the
    /// challenge cannot be satisfied (unknown scheme or algorithm, missing
    /// nonce, `auth-int` only).
    ///
    /// `uri` is the request-target (path and query) and `cnonce` the client
    /// nonce; both are ignored for `Basic`.
    #[must_use]
    pub fn authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> Option<String> {
        match self.scheme {
            Scheme::Basic => Some(basic_authorization(username, password)),
            Scheme::Digest => self.digest_authorization(username, password, method, uri, cnonce),
            Scheme::Other(_) => None,
        }
    }

    fn digest_authorization(
        &self,
        username: &str,
        password: &str,
        method: &str,
        uri: &str,
        cnonce: &str,
    ) -> Option<String> {
        let algorithm = DigestAlgorithm::from_param(self.algorithm())?;
        let nonce = self.nonce()?;
        let realm = self.realm().unwrap_or_default();

        let qop = match self.qop() {
            None => None,
            Some(offered) => {
                if offered.split(',').any(|q| q.trim().eq_ignore_ascii_case("auth")) {
                    Some("auth")
                } else {
                    return None;
                }
            }
        };

        let mut ha1 = algorithm.hash(&format!("{username}:{realm}:{password}"));
        if algorithm.is_session() {
            ha1 = algorithm.hash(&format!("{ha1}:{nonce}:{cnonce}"));
        }
        let ha2 = algorithm.hash(&format!("{method}:{uri}"));
        let response = match qop {
            Some(qop) => algorithm.hash(&format!("{ha1}:{nonce}:{NONCE_COUNT}:{cnonce}:{qop}:{ha2}")),
            None => algorithm.hash(&format!("{ha1}:{nonce}:{ha2}")),
        };

        let mut fields = vec![
            format!("username=\"{}\"", quote(username)),
            format!("realm=\"{}\"", quote(realm)),
            format!("nonce=\"{}\"", quote(nonce)),
            format!("uri=\"{}\"", quote(uri)),
        ];
        if let Some(name) = self.algorithm() {
            fields.push(format!("algorithm={name}"));
        }
        fields.push(format!("response=\"{response}\""));
        if let Some(qop) = qop {
            fields.push(format!("qop={qop}"));
            fields.push(format!("nc={NONCE_COUNT}"));
            fields.push(format!("cnonce=\"{}\"", quote(cnonce)));
        }
        if let Some(opaque) = self.opaque() {
            fields.push(format!("opaque=\"{}\"", quote(opaque)));
        }
        Some(format!("Digest {}", fields.join(", ")))
    }
}

/// `Basic base64(user ":" pass)`
#[must_use]
pub fn basic_authorization(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Random 16 hex character client nonce
#[must_use]
pub fn new_cnonce() -> String {
    hex::encode(rand::random::<[u8; 8]>())
}

/// Pick the challenge to answer: the first usable `Digest`, then the first
/// `Basic`. Returns the `Authorization` value.
#[must_use]
pub fn respond(
    challenges: &[Challenge],
    username: &str,
    password: &str,
    method: &str,
    uri: &str,
    cnonce: &str,
) -> Option<String> {
    let digest = challenges.iter().filter(|c| c.scheme == Scheme::Digest);
    let basic = challenges.iter().filter(|c| c.scheme == Scheme::Basic);
    digest
        .chain(basic)
        .find_map(|c| c.authorization(username, password, method, uri, cnonce))
}

fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Parse one `WWW-Authenticate` header value.
///
/// Returns `None` if the value is malformed. A value may carry several
/// challenges separated by commas.
#[must_use]
pub fn parse_challenges(value: &str) -> Option<Vec<Challenge>> {
    let mut parser = Parser::new(value);
    let mut challenges = Vec::new();

    loop {
        parser.skip_separators();
        if parser.at_end() {
            break;
        }
        let scheme = parser.token()?;
        let mut challenge = Challenge {
            scheme: Scheme::parse(scheme),
            params: Vec::new(),
        };

        parser.skip_whitespace();
        if let Some(token68) = parser.token68() {
            challenge.params.push((String::new(), token68.to_owned()));
        } else {
            while let Some((name, value)) = parser.auth_param()? {
                challenge.params.push((name.to_ascii_lowercase(), value));
                parser.skip_whitespace();
                if !parser.eat(',') {
                    break;
                }
            }
        }
        challenges.push(challenge);
    }

    if challenges.is_empty() {
        None
    } else {
        Some(challenges)
    }
}

struct Parser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn eat(&mut self, ch: char) -> bool {
        if self.peek() == Some(ch) {
            self.pos += ch.len_utf8();
            true
        } else {
            false
        }
    }

    fn skip_whitespace(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start_matches([' ', '\t']).len();
    }

    fn skip_separators(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start_matches([' ', '\t', ',']).len();
    }

    fn token(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let len = rest.find(|c: char| !is_tchar(c)).unwrap_or(rest.len());
        if len == 0 {
            return None;
        }
        self.pos += len;
        Some(&rest[..len])
    }

    /// `token68` form (e.g. `Negotiate YIIB==`): must be the only item
    /// before the next comma, otherwise it is the first auth-param.
    fn token68(&mut self) -> Option<&'a str> {
        let rest = self.rest();
        let body = rest
            .find(|c: char| !(c.is_ascii_alphanumeric() || "-._~+/".contains(c)))
            .unwrap_or(rest.len());
        if body == 0 {
            return None;
        }
        let padded = rest.len() - rest[body..].trim_start_matches('=').len();
        let after = rest[padded..].trim_start_matches([' ', '\t']);
        if !(after.is_empty() || after.starts_with(',')) {
            return None;
        }
        self.pos += padded;
        Some(&rest[..padded])
    }

    /// One `name = value` pair. The inner `None` means the next item is not
    /// a parameter (start of another challenge); the outer `None` means the
    /// value is malformed.
    fn auth_param(&mut self) -> Option<Option<(&'a str, String)>> {
        let checkpoint = self.pos;
        self.skip_whitespace();
        let Some(name) = self.token() else {
            self.pos = checkpoint;
            return Some(None);
        };
        self.skip_whitespace();
        if !self.eat('=') {
            self.pos = checkpoint;
            return Some(None);
        }
        self.skip_whitespace();
        let value = if self.peek() == Some('"') {
            self.quoted_string()?
        } else {
            self.token()?.to_owned()
        };
        Some(Some((name, value)))
    }

    fn quoted_string(&mut self) -> Option<String> {
        if !self.eat('"') {
            return None;
        }
        let mut out = String::new();
        let mut chars = self.rest().char_indices();
        while let Some((idx, ch)) = chars.next() {
            match ch {
                '"' => {
                    self.pos += idx + 1;
                    return Some(out);
                }
                '\\' => out.push(chars.next()?.1),
                _ => out.push(ch),
            }
        }
        None
    }
}

fn is_tchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}
