//! Reverses Dean Edwards' `eval(function(p,a,c,k,e,d){...})` packer.
//!
//! The packed call carries four arguments: the payload with every identifier
//! replaced by its index in base `a`, the radix `a`, the symbol count `c` and
//! the `|`-joined symbol table `k`. Unpacking maps every word of the payload
//! back through the table; no JavaScript is executed.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use thiserror::Error;

static SIGNATURE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"eval\s*\(\s*function\s*\(\s*p\s*,\s*a\s*,\s*c\s*,\s*k\s*,\s*e\s*,\s*d\s*\)")
        .unwrap()
});
static PACKED_ARGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?s)\}\s*\(\s*['"](.*)['"]\s*,\s*(\d+|\[\])\s*,\s*(\d+)\s*,\s*['"](.*)['"]\s*\.split\(\s*['"]\|['"]\s*\)"#,
    )
    .unwrap()
});
static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?-u:\b\w+\b)").unwrap());

const ALPHABET_62: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHABET_95: &str = " !\"#$%&'()*+,-./0123456789:;<=>?@ABCDEFGHIJKLMNOPQRSTUVWXYZ[\\]^_`abcdefghijklmnopqrstuvwxyz{|}~";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UnpackError {
    #[error("source is not packed")]
    NotPacked,
    #[error("packed arguments not found")]
    MalformedArguments,
    #[error("symbol table has {found} entries, expected {expected}")]
    SymtabMismatch { expected: usize, found: usize },
    #[error("unsupported radix {0}")]
    UnsupportedRadix(u32),
}

/// True when `source` contains the packer's `eval(function(p,a,c,k,e,d)` prologue.
pub fn is_packed(source: &str) -> bool {
    SIGNATURE.is_match(source)
}

/// Unpacks a packed script into readable JavaScript source.
pub fn unpack(source: &str) -> Result<String, UnpackError> {
    if !is_packed(source) {
        return Err(UnpackError::NotPacked);
    }

    let caps = PACKED_ARGS
        .captures(source)
        .ok_or(UnpackError::MalformedArguments)?;
    let payload = caps.get(1).map_or("", |m| m.as_str());
    let radix = match caps.get(2).map(|m| m.as_str()) {
        Some("[]") => 62,
        Some(digits) => digits.parse().map_err(|_| UnpackError::MalformedArguments)?,
        None => return Err(UnpackError::MalformedArguments),
    };
    let count: usize = caps
        .get(3)
        .and_then(|m| m.as_str().parse().ok())
        .ok_or(UnpackError::MalformedArguments)?;
    let symtab: Vec<&str> = caps.get(4).map_or("", |m| m.as_str()).split('|').collect();

    if symtab.len() != count {
        return Err(UnpackError::SymtabMismatch {
            expected: count,
            found: symtab.len(),
        });
    }

    let unbaser = Unbaser::new(radix)?;
    let payload = payload.replace("\\\\", "\\").replace("\\'", "'");

    let unpacked = WORD.replace_all(&payload, |caps: &Captures| {
        let word = &caps[0];
        unbaser
            .unbase(word)
            .and_then(|idx| symtab.get(idx))
            .filter(|symbol| !symbol.is_empty())
            .map_or_else(|| word.to_string(), |symbol| (*symbol).to_string())
    });

    Ok(unpacked.into_owned())
}

/// Decodes the packer's base-N identifiers.
enum Unbaser {
    Native(u32),
    Alphabet { radix: usize, digits: HashMap<char, usize> },
}

impl Unbaser {
    fn new(radix: u32) -> Result<Self, UnpackError> {
        match radix {
            2..=36 => Ok(Self::Native(radix)),
            37..=62 => Ok(Self::alphabet(&ALPHABET_62[..radix as usize])),
            95 => Ok(Self::alphabet(ALPHABET_95)),
            other => Err(UnpackError::UnsupportedRadix(other)),
        }
    }

    fn alphabet(chars: &str) -> Self {
        let digits: HashMap<char, usize> = chars.chars().enumerate().map(|(i, c)| (c, i)).collect();
        Self::Alphabet {
            radix: digits.len(),
            digits,
        }
    }

    fn unbase(&self, word: &str) -> Option<usize> {
        match self {
            Self::Native(radix) => usize::from_str_radix(word, *radix).ok(),
            Self::Alphabet { radix, digits } => word.chars().try_fold(0usize, |acc, c| {
                let digit = *digits.get(&c)?;
                acc.checked_mul(*radix)?.checked_add(digit)
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PACKED: &str = r#"eval(function(p,a,c,k,e,d){e=function(c){return c.toString(36)};if(!''.replace(/^/,String)){while(c--){d[c.toString(a)]=k[c]||c.toString(a)}k=[function(e){return d[e]}];e=function(){return'\\w+'};c=1};while(c--){if(k[c]){p=p.replace(new RegExp('\\b'+e(c)+'\\b','g'),k[c])}}return p}('3 0=4("5");0.6({7:[{8:"9://a.b/c/d.e"}]});',36,15,'player|||var|videojs|vplayer|setup|sources|src|https|cdn|example|hls|master|m3u8'.split('|'),0,{}))"#;

    #[test]
    fn detects_signature() {
        assert!(is_packed(PACKED));
        assert!(is_packed("eval( function (p, a, c, k, e, d) {}"));
        assert!(!is_packed("var x = eval('1+1');"));
    }

    #[test]
    fn unpacks_base36_payload() {
        let source = unpack(PACKED).unwrap();
        assert_eq!(
            source,
            r#"var player=videojs("vplayer");player.setup({sources:[{src:"https://cdn.example/hls/master.m3u8"}]});"#
        );
    }

    #[test]
    fn empty_symbols_keep_the_encoded_word() {
        let packed = r"eval(function(p,a,c,k,e,d){return p}('0 1 2',10,3,'alpha||gamma'.split('|')))";
        assert_eq!(unpack(packed).unwrap(), "alpha 1 gamma");
    }

    #[test]
    fn unpacks_base62_payload() {
        // 'Z' is 61 and '10' is 62 in base 62
        let mut symbols = vec![""; 63];
        symbols[61] = "sixtyone";
        symbols[62] = "sixtytwo";
        let packed = format!(
            "eval(function(p,a,c,k,e,d){{return p}}('Z+10',62,63,'{}'.split('|')))",
            symbols.join("|")
        );
        assert_eq!(unpack(&packed).unwrap(), "sixtyone+sixtytwo");

        let packed = packed.replace(",62,", ",[],");
        assert_eq!(unpack(&packed).unwrap(), "sixtyone+sixtytwo");
    }

    #[test]
    fn unescapes_quotes_in_payload() {
        let packed = r"eval(function(p,a,c,k,e,d){return p}('0(\'1\')',10,2,'alert|hi'.split('|')))";
        assert_eq!(unpack(packed).unwrap(), "alert('hi')");
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!(unpack("var a = 1;"), Err(UnpackError::NotPacked));
        assert_eq!(
            unpack("eval(function(p,a,c,k,e,d){return p}"),
            Err(UnpackError::MalformedArguments)
        );
        assert_eq!(
            unpack(r"eval(function(p,a,c,k,e,d){return p}('0',10,3,'a|b'.split('|')))"),
            Err(UnpackError::SymtabMismatch {
                expected: 3,
                found: 2
            })
        );
        assert_eq!(
            unpack(r"eval(function(p,a,c,k,e,d){return p}('0',70,1,'a'.split('|')))"),
            Err(UnpackError::UnsupportedRadix(70))
        );
    }

    #[test]
    fn unbase_alphabet_rejects_foreign_chars() {
        let unbaser = Unbaser::new(62).unwrap();
        assert_eq!(unbaser.unbase("A"), Some(36));
        assert_eq!(unbaser.unbase("_"), None);
        let native = Unbaser::new(36).unwrap();
        assert_eq!(native.unbase("z"), Some(35));
        assert_eq!(native.unbase("_x"), None);
    }
}
