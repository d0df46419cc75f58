//! Message printing
//!
//! Each message becomes one line:
//!
//! ```text
//! SSSSSSSS.FFFFFFFF /path types arg arg ...
//! ```
//!
//! Messages inside a bundle carry the bundle's timetag; others carry their
//! own, or the time of arrival when they have none.

use std::io::Write;
use std::sync::Arc;

use osclink_common::{Argument, HandlerResult, Message, Server, Timetag};
use parking_lot::Mutex;

/// Renders one dump line
pub fn format_line(timetag: Timetag, path: &str, types: &str, args: &[Argument]) -> String {
    let mut line = format!("{} {} {}", timetag, path, types);
    for arg in args {
        line.push(' ');
        line.push_str(&arg.to_string());
    }
    line
}

/// Timetag printed for `msg` given the bundle being dispatched, if any
pub fn line_timetag(bundle: Option<Timetag>, msg: &Message) -> Timetag {
    bundle.unwrap_or_else(|| match msg.timetag() {
        tt if tt.is_immediate() => Timetag::now(),
        tt => tt,
    })
}

fn bundle_timetag(tt: Timetag) -> Timetag {
    if tt.is_immediate() {
        Timetag::now()
    } else {
        tt
    }
}

/// Timetags of the bundles being dispatched, innermost last
#[derive(Debug, Default)]
pub struct BundleTimetags {
    stack: Vec<Timetag>,
}

impl BundleTimetags {
    pub fn enter(&mut self, tt: Timetag) {
        self.stack.push(bundle_timetag(tt));
    }

    pub fn leave(&mut self) {
        self.stack.pop();
    }

    pub fn current(&self) -> Option<Timetag> {
        self.stack.last().copied()
    }
}

/// Registers the catch-all printing method and bundle tracking on `server`
pub fn install(server: &mut Server, print_errors: bool) -> osclink_common::Result<()> {
    let bundles: Arc<Mutex<BundleTimetags>> = Arc::default();
    let (start, end) = (bundles.clone(), bundles.clone());
    server.add_bundle_handlers(
        Box::new(move |tt: Timetag| start.lock().enter(tt)),
        Box::new(move || end.lock().leave()),
    );

    server.add_method(None, None, move |path: &str, types: &str, args: &[Argument], msg: &Message| {
        let line = format_line(line_timetag(bundles.lock().current(), msg), path, types, args);
        let mut out = std::io::stdout().lock();
        // output errors such as a closed pipe are ignored
        let _ = writeln!(out, "{}", line);
        HandlerResult::Handled
    })?;

    if print_errors {
        server.set_error_handler(Some(Box::new(|code: i32, msg: &str, path: Option<&str>| {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(
                out,
                "osclink server error {} in path {}: {}",
                code,
                path.unwrap_or("(none)"),
                msg
            );
        })));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_line() {
        let args = [
            Argument::Int32(1),
            Argument::Float(2.0),
            Argument::String("x".into()),
            Argument::Symbol("sym".into()),
            Argument::from(vec![1u8, 2]),
        ];
        assert_eq!(
            format_line(Timetag::new(1, 2), "/a", "ifsSb", &args),
            "00000001.00000002 /a ifsSb 1 2.000000 \"x\" 'sym [2b 0x01 0x02]"
        );
        assert_eq!(format_line(Timetag::new(0xdead, 0), "/empty", "", &[]), "0000dead.00000000 /empty ");
    }

    #[test]
    fn test_line_timetag() {
        let msg = Message::new();
        let bundle = Timetag::new(100, 5);
        assert_eq!(line_timetag(Some(bundle), &msg), bundle);

        // immediate messages print the arrival time
        let before = Timetag::now();
        let printed = line_timetag(None, &msg);
        assert!(printed >= before);
        assert!(!printed.is_immediate());

        assert_eq!(bundle_timetag(bundle), bundle);
        assert!(!bundle_timetag(Timetag::IMMEDIATE).is_immediate());
    }

    #[test]
    fn test_nested_bundles_keep_outer_timetag() {
        let mut bundles = BundleTimetags::default();
        let (outer, inner) = (Timetag::new(10, 0), Timetag::new(20, 0));
        assert_eq!(bundles.current(), None);

        bundles.enter(outer);
        bundles.enter(inner);
        assert_eq!(bundles.current(), Some(inner));
        bundles.leave();
        assert_eq!(bundles.current(), Some(outer));
        bundles.leave();
        assert_eq!(bundles.current(), None);

        // an unbalanced end leaves nothing behind
        bundles.leave();
        assert_eq!(bundles.current(), None);
    }
}
