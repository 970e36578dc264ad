//! Fragment Emitter
//!
//! Splits a complete reply into single-character fragments, each carrying a
//! pacing hint. The emitter only advises how long to hold a fragment; the
//! session controller does the actual waiting.

use std::str::Chars;
use std::time::Duration;

/// Pacing delays applied per fragment
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Pacing {
    /// Delay after ordinary characters
    pub base: Duration,
    /// Delay after punctuation
    pub punctuation: Duration,
    /// Delay after CJK ideographs
    pub cjk: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(15),
            punctuation: Duration::from_millis(100),
            cjk: Duration::from_millis(40),
        }
    }
}

impl Pacing {
    /// No delay at all
    #[must_use]
    pub fn instant() -> Self {
        Self {
            base: Duration::ZERO,
            punctuation: Duration::ZERO,
            cjk: Duration::ZERO,
        }
    }

    /// Delay to hold after emitting `c`
    #[must_use]
    pub fn delay_for(&self, c: char) -> Duration {
        if is_pause_punctuation(c) {
            self.punctuation
        } else if is_cjk_ideograph(c) {
            self.cjk
        } else {
            self.base
        }
    }
}

/// Sentence punctuation that earns a longer pause (ASCII and full-width)
fn is_pause_punctuation(c: char) -> bool {
    matches!(
        c,
        ',' | '.' | '!' | '?' | ';' | ':' | '，' | '。' | '！' | '？' | '；' | '：'
    )
}

/// CJK unified ideographs (basic block and extension A)
fn is_cjk_ideograph(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}')
}

/// One unit of paced output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Fragment {
    /// Text to deliver
    pub text: String,
    /// How long to hold before delivering the next fragment
    pub delay: Duration,
}

impl Fragment {
    /// A fragment with no pacing delay
    pub fn immediate(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            delay: Duration::ZERO,
        }
    }
}

/// Lazy, finite, single-pass sequence of fragments over a reply
///
/// Consumed by iteration; build a new emitter to deliver the same reply again.
#[derive(Debug)]
pub struct FragmentEmitter<'a> {
    chars: Chars<'a>,
    pacing: Pacing,
}

impl<'a> FragmentEmitter<'a> {
    /// Emitter over `text` with the given pacing
    #[must_use]
    pub fn new(text: &'a str, pacing: Pacing) -> Self {
        Self {
            chars: text.chars(),
            pacing,
        }
    }
}

impl Iterator for FragmentEmitter<'_> {
    type Item = Fragment;

    fn next(&mut self) -> Option<Fragment> {
        let c = self.chars.next()?;
        Some(Fragment {
            text: c.to_string(),
            delay: self.pacing.delay_for(c),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.chars.size_hint()
    }
}

impl std::iter::FusedIterator for FragmentEmitter<'_> {}

/// Emit fragments for `text` with default pacing
#[must_use]
pub fn emit(text: &str) -> FragmentEmitter<'_> {
    FragmentEmitter::new(text, Pacing::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn texts(text: &str) -> Vec<String> {
        emit(text).map(|f| f.text).collect()
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert_eq!(emit("").count(), 0);
    }

    #[test]
    fn test_one_fragment_per_char() {
        assert_eq!(texts("abc"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_reconstructs_text() {
        for text in [
            "Hello, world!",
            "  leading and trailing  \n\ttabs",
            "你好，世界。",
            "emoji 🦀 and ñ and ü",
            "mixed 中文 and English; ok?",
        ] {
            let joined: String = emit(text).map(|f| f.text).collect();
            assert_eq!(joined, text);
            assert_eq!(emit(text).count(), text.chars().count());
        }
    }

    #[test]
    fn test_multibyte_chars_are_atomic() {
        assert_eq!(texts("中🦀"), vec!["中", "🦀"]);
    }

    #[test]
    fn test_pacing_tiers() {
        let pacing = Pacing::default();

        assert_eq!(pacing.delay_for('a'), Duration::from_millis(15));
        assert_eq!(pacing.delay_for(' '), Duration::from_millis(15));
        assert_eq!(pacing.delay_for('🦀'), Duration::from_millis(15));

        for p in [',', '.', '!', '?', ';', ':', '，', '。', '！', '？', '；', '：'] {
            assert_eq!(pacing.delay_for(p), Duration::from_millis(100), "{p}");
        }

        assert_eq!(pacing.delay_for('中'), Duration::from_millis(40));
        assert_eq!(pacing.delay_for('龥'), Duration::from_millis(40));
        assert_eq!(pacing.delay_for('㐀'), Duration::from_millis(40));
    }

    #[test]
    fn test_fragments_carry_delay() {
        let fragments: Vec<_> = emit("a,中").collect();
        assert_eq!(fragments[0].delay, Duration::from_millis(15));
        assert_eq!(fragments[1].delay, Duration::from_millis(100));
        assert_eq!(fragments[2].delay, Duration::from_millis(40));
    }

    #[test]
    fn test_emitter_is_single_pass() {
        let mut emitter = emit("ab");
        assert_eq!(emitter.next().map(|f| f.text), Some("a".to_string()));
        assert_eq!(emitter.next().map(|f| f.text), Some("b".to_string()));
        assert_eq!(emitter.next(), None);
        assert_eq!(emitter.next(), None);
    }

    #[test]
    fn test_instant_pacing() {
        assert!(FragmentEmitter::new("a.中", Pacing::instant()).all(|f| f.delay.is_zero()));
    }
}
