//! Positional message templating.
//!
//! Templates are literal text with `{}` placeholders consumed left to right by arguments.
//! `\{` produces a literal `{` and `\\` a literal `\`. Arguments that no placeholder consumed
//! are appended as ` {a, b}`. When the final argument is an error it is extracted into
//! [`Encoded::error`] instead of being printed inline, so sinks can render it as a trace.
//!
//! Encoding never fails: a value whose `Display`/`Debug` implementation errors or panics is
//! rendered as [`RENDER_FAILURE`].

use std::error::Error as StdError;
use std::fmt::{self, Write as _};
use std::panic::{self, AssertUnwindSafe};

use crate::record::ErrorInfo;

/// Text substituted for an argument whose conversion to text failed.
pub const RENDER_FAILURE: &str = "[FAILED toString()]";

/// One template argument together with the way it should be rendered.
#[derive(Clone, Copy)]
pub enum Arg<'a> {
    /// Rendered with `Display`.
    Display(&'a dyn fmt::Display),
    /// Rendered with `Debug`.
    Debug(&'a dyn fmt::Debug),
    /// Error value; extracted into the record when it is the final argument.
    Error(&'a (dyn StdError + 'static)),
}

impl<'a> Arg<'a> {
    /// Wrap a value rendered through `Display`.
    pub fn display<T: fmt::Display>(value: &'a T) -> Self {
        Self::Display(value)
    }

    /// Wrap a value rendered through `Debug`.
    pub fn debug<T: fmt::Debug>(value: &'a T) -> Self {
        Self::Debug(value)
    }

    /// Wrap an error value.
    pub fn error<E: StdError + 'static>(value: &'a E) -> Self {
        Self::Error(value)
    }

    fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

impl fmt::Debug for Arg<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Display(_) => f.write_str("Arg::Display"),
            Self::Debug(_) => f.write_str("Arg::Debug"),
            Self::Error(_) => f.write_str("Arg::Error"),
        }
    }
}

/// Result of encoding a template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    /// Finalized message text.
    pub text: String,
    /// Error extracted from the trailing argument, if any.
    pub error: Option<ErrorInfo>,
}

/// Substitute `args` into `template`.
pub fn encode(template: &str, args: &[Arg<'_>]) -> Encoded {
    if args.is_empty() {
        return Encoded {
            text: template.to_owned(),
            error: None,
        };
    }

    let last = args.len() - 1;
    let error = match args[last] {
        Arg::Error(err) => Some(ErrorInfo::capture(err)),
        _ => None,
    };

    let mut text = String::with_capacity(template.len() + 16 * args.len());
    let mut next = 0;
    let mut chars = template.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' => match chars.peek() {
                Some(&(escaped @ ('{' | '\\'))) => {
                    chars.next();
                    text.push(escaped);
                }
                _ => text.push('\\'),
            },
            '{' if next < args.len() && chars.peek() == Some(&'}') => {
                chars.next();
                // The extracted error leaves an empty slot; the sink prints it as a trace.
                if !(next == last && error.is_some()) {
                    render_into(&mut text, &args[next]);
                }
                next += 1;
            }
            other => text.push(other),
        }
    }

    let mut leftover = &args[next..];
    if leftover.last().is_some_and(Arg::is_error) {
        leftover = &leftover[..leftover.len() - 1];
    }
    if !leftover.is_empty() {
        text.push_str(" {");
        for (index, arg) in leftover.iter().enumerate() {
            if index > 0 {
                text.push_str(", ");
            }
            render_into(&mut text, arg);
        }
        text.push('}');
    }

    Encoded { text, error }
}

/// `Display` rendering of an error, guarded like any other argument.
pub(crate) fn render_error(error: &(dyn StdError + 'static)) -> String {
    let mut out = String::new();
    render_into(&mut out, &Arg::Error(error));
    out
}

fn render_into(out: &mut String, arg: &Arg<'_>) {
    let start = out.len();
    let outcome = panic::catch_unwind(AssertUnwindSafe(|| match arg {
        Arg::Display(value) => write!(out, "{value}"),
        Arg::Debug(value) => write!(out, "{value:?}"),
        Arg::Error(value) => write!(out, "{value}"),
    }));
    if !matches!(outcome, Ok(Ok(()))) {
        out.truncate(start);
        out.push_str(RENDER_FAILURE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Problem;

    impl fmt::Display for Problem {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("out of coffee")
        }
    }

    impl StdError for Problem {}

    struct Broken;

    impl fmt::Display for Broken {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("partial")?;
            Err(fmt::Error)
        }
    }

    #[derive(Debug)]
    struct BrokenError;

    impl fmt::Display for BrokenError {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            Err(fmt::Error)
        }
    }

    impl StdError for BrokenError {}

    #[derive(Debug)]
    struct Wrapped(PanickingError);

    impl fmt::Display for Wrapped {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("request failed")
        }
    }

    impl StdError for Wrapped {
        fn source(&self) -> Option<&(dyn StdError + 'static)> {
            Some(&self.0)
        }
    }

    #[derive(Debug)]
    struct PanickingError;

    impl fmt::Display for PanickingError {
        fn fmt(&self, _f: &mut fmt::Formatter<'_>) -> fmt::Result {
            panic!("display exploded")
        }
    }

    impl StdError for PanickingError {}

    #[test]
    fn substitutes_placeholders_in_order() {
        let encoded = encode("{} + {} = {}", &[Arg::display(&1), Arg::display(&2), Arg::display(&3)]);
        assert_eq!(encoded.text, "1 + 2 = 3");
        assert!(encoded.error.is_none());
    }

    #[test]
    fn leftover_arguments_are_listed() {
        let encoded = encode(
            "I want {} and {}",
            &[
                Arg::display(&"ice-cream"),
                Arg::display(&"biscuits"),
                Arg::display(&"coffee"),
                Arg::display(&"donuts"),
            ],
        );
        assert_eq!(encoded.text, "I want ice-cream and biscuits {coffee, donuts}");
        assert!(encoded.error.is_none());
    }

    #[test]
    fn placeholder_consuming_trailing_error_leaves_empty_slot() {
        let encoded = encode("Problem probably {}", &[Arg::error(&Problem)]);
        assert_eq!(encoded.text, "Problem probably ");
        assert_eq!(encoded.error.unwrap().message, "out of coffee");
    }

    #[test]
    fn leftover_single_error_is_extracted_not_printed() {
        let encoded = encode("Problem", &[Arg::error(&Problem)]);
        assert_eq!(encoded.text, "Problem");
        assert_eq!(encoded.error.unwrap().message, "out of coffee");
    }

    #[test]
    fn trailing_error_is_excluded_from_leftover_list() {
        let encoded = encode(
            "status {}",
            &[Arg::display(&"red"), Arg::display(&7), Arg::error(&Problem)],
        );
        assert_eq!(encoded.text, "status red {7}");
        assert!(encoded.error.is_some());
    }

    #[test]
    fn error_in_the_middle_is_rendered_inline() {
        let encoded = encode("{} then {}", &[Arg::error(&Problem), Arg::display(&"retry")]);
        assert_eq!(encoded.text, "out of coffee then retry");
        assert!(encoded.error.is_none());
    }

    #[test]
    fn escapes_never_substitute() {
        let encoded = encode(r"\{} and \\{}", &[Arg::display(&"x")]);
        assert_eq!(encoded.text, r"{} and \x");
    }

    #[test]
    fn lone_backslash_is_kept() {
        let encoded = encode(r"C:\temp {}", &[Arg::display(&"ok")]);
        assert_eq!(encoded.text, r"C:\temp ok");
    }

    #[test]
    fn exhausted_arguments_leave_placeholders() {
        let encoded = encode("{} and {}", &[Arg::display(&"one")]);
        assert_eq!(encoded.text, "one and {}");
    }

    #[test]
    fn zero_arguments_skip_scanning() {
        let encoded = encode(r"raw \{} {}", &[]);
        assert_eq!(encoded.text, r"raw \{} {}");
    }

    #[test]
    fn debug_arguments_use_debug_rendering() {
        let encoded = encode("items {}", &[Arg::debug(&vec![1, 2])]);
        assert_eq!(encoded.text, "items [1, 2]");
    }

    #[test]
    fn failing_conversion_becomes_marker() {
        let encoded = encode("value {} end", &[Arg::display(&Broken)]);
        assert_eq!(encoded.text, format!("value {RENDER_FAILURE} end"));
    }

    #[test]
    fn failing_error_display_is_extracted_as_marker() {
        let encoded = encode("oops", &[Arg::error(&BrokenError)]);
        assert_eq!(encoded.text, "oops");
        assert_eq!(encoded.error.unwrap().message, RENDER_FAILURE);
    }

    #[test]
    fn panicking_error_cause_is_extracted_as_marker() {
        let encoded = encode("call {}", &[Arg::display(&"api"), Arg::error(&Wrapped(PanickingError))]);
        assert_eq!(encoded.text, "call api");
        let error = encoded.error.unwrap();
        assert_eq!(error.message, "request failed");
        assert_eq!(error.causes, vec![RENDER_FAILURE.to_string()]);
    }
}
