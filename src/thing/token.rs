//! Login token generation.
//!
//! The platform authenticates a device with a token passed as the MQTT
//! password:
//!
//! ```text
//! version=2018-10-31&res=products%2F{pid}%2Fdevices%2F{dev}&et={expiry}&method={m}&sign={sig}
//! ```
//!
//! `sig` is the base64 signature of
//! `"{expiry}\n{m}\nproducts/{pid}/devices/{dev}\n2018-10-31"` made with the
//! base64-decoded access key, url-encoded. The keyed hash itself is supplied
//! by the platform through [`Signer`].

use base64ct::{Base64, Encoding};
use core::fmt::Write as _;
use heapless::String;

/// Token format version.
pub const TOKEN_VERSION: &str = "2018-10-31";
/// Longest token this module builds.
pub const MAX_TOKEN_LEN: usize = 256;
/// Largest signature a [`Signer`] may produce.
pub const MAX_SIGNATURE_LEN: usize = 64;

/// A login token.
pub type Token = String<MAX_TOKEN_LEN>;

/// Signature algorithms the platform accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignMethod {
    /// HMAC-MD5.
    Md5,
    /// HMAC-SHA1.
    Sha1,
    /// HMAC-SHA256.
    Sha256,
    /// SM2 signature.
    Sm2,
}

impl SignMethod {
    /// Name used in the token and the signed string.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignMethod::Md5 => "md5",
            SignMethod::Sha1 => "sha1",
            SignMethod::Sha256 => "sha256",
            SignMethod::Sm2 => "sm2",
        }
    }

    /// Signature length in bytes.
    pub fn signature_len(&self) -> usize {
        match self {
            SignMethod::Md5 => 16,
            SignMethod::Sha1 => 20,
            SignMethod::Sha256 => 32,
            SignMethod::Sm2 => 64,
        }
    }
}

/// Token generation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TokenError {
    /// The access key is not valid base64.
    InvalidKey,
    /// The signer failed.
    Signer,
    /// The token does not fit into [`MAX_TOKEN_LEN`].
    BufferOverflow,
}

/// Keyed signature primitive.
pub trait Signer {
    /// Algorithm this signer implements.
    fn method(&self) -> SignMethod;

    /// Sign `message` with `key` into `out`, returning the signature length.
    fn sign(&self, key: &[u8], message: &[u8], out: &mut [u8]) -> Result<usize, TokenError>;
}

/// Build a login token.
///
/// With `device_name` set to `None` the token is scoped to the whole product.
pub fn generate<G: Signer + ?Sized>(
    signer: &G,
    expiry: u64,
    product_id: &str,
    device_name: Option<&str>,
    access_key: &str,
) -> Result<Token, TokenError> {
    let method = signer.method().as_str();
    let mut token = Token::new();
    let mut message: String<192> = String::new();

    write!(token, "version={}&res=products%2F{}", TOKEN_VERSION, product_id)
        .map_err(|_| TokenError::BufferOverflow)?;
    if let Some(device) = device_name {
        write!(token, "%2Fdevices%2F{}", device).map_err(|_| TokenError::BufferOverflow)?;
    }
    write!(token, "&et={}&method={}", expiry, method).map_err(|_| TokenError::BufferOverflow)?;

    let written = match device_name {
        Some(device) => write!(
            message,
            "{}\n{}\nproducts/{}/devices/{}\n{}",
            expiry, method, product_id, device, TOKEN_VERSION
        ),
        None => write!(message, "{}\n{}\nproducts/{}\n{}", expiry, method, product_id, TOKEN_VERSION),
    };
    written.map_err(|_| TokenError::BufferOverflow)?;

    let mut key_buf = [0u8; 128];
    let key = Base64::decode(access_key, &mut key_buf).map_err(|_| TokenError::InvalidKey)?;

    let mut signature = [0u8; MAX_SIGNATURE_LEN];
    let len = signer.sign(key, message.as_bytes(), &mut signature)?;
    let signature = signature.get(..len).ok_or(TokenError::Signer)?;

    let mut encoded = [0u8; 96];
    let encoded =
        Base64::encode(signature, &mut encoded).map_err(|_| TokenError::BufferOverflow)?;

    token.push_str("&sign=").map_err(|_| TokenError::BufferOverflow)?;
    url_encode(encoded, &mut token)?;
    Ok(token)
}

/// Append `text` to `out`, escaping the characters that are special in a
/// query string.
pub fn url_encode<const N: usize>(text: &str, out: &mut String<N>) -> Result<(), TokenError> {
    for c in text.chars() {
        let escaped = match c {
            '+' => "%2B",
            ' ' => "%20",
            '/' => "%2F",
            '?' => "%3F",
            '%' => "%25",
            '#' => "%23",
            '&' => "%26",
            '=' => "%3D",
            _ => {
                out.push(c).map_err(|_| TokenError::BufferOverflow)?;
                continue;
            }
        };
        out.push_str(escaped).map_err(|_| TokenError::BufferOverflow)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Returns the message itself so the signed string can be inspected.
    struct Mirror;

    impl Signer for Mirror {
        fn method(&self) -> SignMethod {
            SignMethod::Sha1
        }

        fn sign(&self, key: &[u8], message: &[u8], out: &mut [u8]) -> Result<usize, TokenError> {
            if key != b"key" {
                return Err(TokenError::Signer);
            }
            out[..message.len()].copy_from_slice(message);
            Ok(message.len())
        }
    }

    struct Fixed;

    impl Signer for Fixed {
        fn method(&self) -> SignMethod {
            SignMethod::Sha256
        }

        fn sign(&self, _key: &[u8], _message: &[u8], out: &mut [u8]) -> Result<usize, TokenError> {
            out[..3].copy_from_slice(&[0xfb, 0xff, 0xfe]);
            Ok(3)
        }
    }

    #[test]
    fn device_token_layout() {
        let token = generate(&Fixed, 1_924_833_600, "pid", Some("dev"), "a2V5").unwrap();
        assert_eq!(
            token,
            "version=2018-10-31&res=products%2Fpid%2Fdevices%2Fdev&et=1924833600&method=sha256&sign=%2B%2F%2F%2B"
        );
    }

    #[test]
    fn signed_string_uses_decoded_key() {
        let token = generate(&Mirror, 1_924_833_600, "pid", Some("dev"), "a2V5").unwrap();
        let sign = token.split("&sign=").nth(1).unwrap();
        assert!(!sign.contains('='), "padding must be escaped: {sign}");

        let mut unescaped: String<128> = String::new();
        let mut rest = sign;
        while let Some(i) = rest.find('%') {
            unescaped.push_str(&rest[..i]).unwrap();
            let c = match &rest[i..i + 3] {
                "%2B" => '+',
                "%2F" => '/',
                "%3D" => '=',
                other => panic!("unexpected escape {other}"),
            };
            unescaped.push(c).unwrap();
            rest = &rest[i + 3..];
        }
        unescaped.push_str(rest).unwrap();

        let mut buf = [0u8; 96];
        let signed = Base64::decode(unescaped.as_str(), &mut buf).unwrap();
        assert_eq!(signed, b"1924833600\nsha1\nproducts/pid/devices/dev\n2018-10-31");
    }

    #[test]
    fn product_token_omits_device() {
        let token = generate(&Fixed, 1, "pid", None, "a2V5").unwrap();
        assert!(token.starts_with("version=2018-10-31&res=products%2Fpid&et=1&method=sha256"));
    }

    #[test]
    fn bad_key_is_rejected() {
        assert_eq!(
            generate(&Fixed, 1, "pid", Some("dev"), "not base64!").unwrap_err(),
            TokenError::InvalidKey
        );
    }

    #[test]
    fn url_encoding_covers_query_specials() {
        let mut out: String<64> = String::new();
        url_encode("a+b /?%#&=c", &mut out).unwrap();
        assert_eq!(out, "a%2Bb%20%2F%3F%25%23%26%3Dc");
    }
}
