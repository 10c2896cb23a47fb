//! A trivial tracing facility: each pipeline stage logs to stderr
//! when its level is enabled.

use bitmask_enum::bitmask;

#[bitmask]
pub enum Trace {
    Collect,
    Simplify,
    Ground,
    Schedule,
    Solve,
    Check,
}

#[macro_export]
macro_rules! trace {
    ($trace:expr, $level:ident, $fmt:literal $(,)? $($arg:expr),* $(,)?) => {
        if $trace.intersects($crate::Trace::$level) {
            eprintln!($fmt, $($arg),*);
        }
    }
}

#[cfg(test)]
mod test {
    use super::Trace;

    #[test]
    fn levels() {
        let trace = Trace::Simplify | Trace::Solve;
        assert!(trace.intersects(Trace::Solve));
        assert!(!trace.intersects(Trace::Ground));
        assert!(Trace::all().intersects(Trace::Check));
        assert!(!Trace::none().intersects(Trace::Collect));
    }
}
