//! Signature cipher deciphering for stream URLs

use crate::error::ResolveError;
use crate::platform::client::Fetcher;
use crate::platform::jsinterp::{JsInterpreter, ScriptError, Value};
use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;
use tracing::debug;

// The player hands `c.s` to the decipher function only when `c.sig` is absent
static SIG_FUNCTION_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.sig\|\|([a-zA-Z0-9$]+)\(").expect("valid regex"));

/// Errors raised while turning a signature token into a signature
#[derive(Debug, Error)]
pub enum CipherError {
    #[error("signature function not found in player script")]
    FunctionNotFound,

    #[error("record carries neither a signature nor a signature token")]
    MissingToken,

    #[error("signature function returned {0} instead of a string")]
    NonStringResult(&'static str),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Name of the signature entry point in `script`
pub fn find_signature_function(script: &str) -> Result<String, CipherError> {
    SIG_FUNCTION_NAME
        .captures(script)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or(CipherError::FunctionNotFound)
}

/// Run the script's signature function over `token`
pub fn decipher(script: &str, token: &str) -> Result<String, CipherError> {
    let name = find_signature_function(script)?;
    debug!("Signature function: {}", name);

    let interpreter = JsInterpreter::new(script);
    let function = interpreter.extract_function(&name)?;
    match function.call(vec![Value::from(token)])? {
        Value::Str(signature) => Ok(signature),
        other => Err(CipherError::NonStringResult(other.type_name())),
    }
}

/// Per-resolution cipher session.
///
/// The player script is fetched on first use and kept for the rest of the
/// session; a new session fetches it again.
pub struct CipherResolver<'a> {
    fetcher: &'a dyn Fetcher,
    script: Option<(String, String)>,
}

impl<'a> CipherResolver<'a> {
    pub fn new(fetcher: &'a dyn Fetcher) -> Self {
        Self {
            fetcher,
            script: None,
        }
    }

    /// Decipher `token` with the script at `script_url`
    pub async fn resolve(&mut self, token: &str, script_url: &str) -> Result<String, ResolveError> {
        let script = self.script(script_url).await?;
        Ok(decipher(script, token)?)
    }

    async fn script(&mut self, script_url: &str) -> Result<&str, ResolveError> {
        let cached = matches!(&self.script, Some((url, _)) if url == script_url);
        if cached {
            debug!("Player script cache hit: {}", script_url);
        } else {
            debug!("Fetching player script: {}", script_url);
            let fetched = self
                .fetcher
                .fetch(script_url)
                .await
                .map_err(|e| ResolveError::fetch(script_url, format!("script unreachable: {}", e)))?;
            if !fetched.is_success() {
                return Err(ResolveError::fetch(
                    script_url,
                    format!("script unreachable: status {}", fetched.status),
                ));
            }
            self.script = Some((script_url.to_string(), fetched.body));
        }

        Ok(self
            .script
            .as_ref()
            .map(|(_, text)| text.as_str())
            .unwrap_or_default())
    }

    /// Whether a script has been fetched in this session
    pub fn has_script(&self) -> bool {
        self.script.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::client::Fetched;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PLAYER_JS: &str = r#"
        var Zr={wX:function(a){a.reverse()},
        Pq:function(a,b){a.splice(0,b)},
        kM:function(a,b){var c=a[0];a[0]=a[b%a.length];a[b%a.length]=c}};
        var Xt=function(a){a=a.split("");Zr.kM(a,48);Zr.wX(a,25);Zr.Pq(a,3);Zr.kM(a,2);return a.join("")};
        yt.load=function(c){c.url+="&signature="+(c.sig||Xt(c.s))};
    "#;

    struct CountingFetcher {
        body: &'static str,
        status: u16,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(status: u16, body: &'static str) -> Self {
            Self {
                body,
                status,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, _url: &str) -> Result<Fetched, ResolveError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Fetched::new(self.status, self.body))
        }
    }

    #[test]
    fn test_find_signature_function() {
        assert_eq!(find_signature_function(PLAYER_JS).unwrap(), "Xt");
        assert_eq!(
            find_signature_function("d.sig||$w(d.s)").unwrap(),
            "$w"
        );
        assert!(matches!(
            find_signature_function("function f(a){}"),
            Err(CipherError::FunctionNotFound)
        ));
    }

    #[test]
    fn test_decipher() {
        assert_eq!(decipher(PLAYER_JS, "abcdefghij").unwrap(), "efgdcbi");
    }

    #[test]
    fn test_decipher_simple_reverse() {
        let js = "a=function(b){return b.reverse()};c.sig||a(c.s)";
        assert_eq!(decipher(js, "xyz").unwrap(), "zyx");
    }

    #[test]
    fn test_decipher_non_string_result() {
        let js = "function f(a){return a.split('')};c.sig||f(c.s)";
        assert!(matches!(
            decipher(js, "abc"),
            Err(CipherError::NonStringResult("array"))
        ));
    }

    #[test]
    fn test_decipher_missing_function_body() {
        let js = "c.sig||gone(c.s)";
        assert!(matches!(
            decipher(js, "abc"),
            Err(CipherError::Script(ScriptError::FunctionNotFound(_)))
        ));
    }

    #[tokio::test]
    async fn test_script_fetched_once_per_session() {
        let fetcher = CountingFetcher::new(200, PLAYER_JS);
        let mut resolver = CipherResolver::new(&fetcher);
        assert!(!resolver.has_script());

        let first = resolver.resolve("abcdefghij", "http://s/p.js").await.unwrap();
        let second = resolver.resolve("0123456789", "http://s/p.js").await.unwrap();

        assert_eq!(first, "efgdcbi");
        assert_eq!(second, "4563218");
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(resolver.has_script());
    }

    #[tokio::test]
    async fn test_new_session_fetches_again() {
        let fetcher = CountingFetcher::new(200, PLAYER_JS);
        for _ in 0..2 {
            let mut resolver = CipherResolver::new(&fetcher);
            resolver.resolve("abcdefghij", "http://s/p.js").await.unwrap();
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_script_unreachable() {
        let fetcher = CountingFetcher::new(404, "");
        let mut resolver = CipherResolver::new(&fetcher);
        let err = resolver.resolve("abc", "http://s/p.js").await.unwrap_err();

        assert!(matches!(err, ResolveError::Fetch { .. }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_cipher_failure_is_not_fatal() {
        let fetcher = CountingFetcher::new(200, "var nothing=1;");
        let mut resolver = CipherResolver::new(&fetcher);
        let err = resolver.resolve("abc", "http://s/p.js").await.unwrap_err();

        assert!(matches!(err, ResolveError::Cipher(CipherError::FunctionNotFound)));
        assert!(!err.is_fatal());
    }
}
