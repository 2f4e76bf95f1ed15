/// Reports a broken caller contract (double free, foreign pointer and so on).
///
/// Panics in debug builds or with the `checked` feature, otherwise logs the violation so the
/// caller can skip the offending operation.
macro_rules! contract_violation {
    ($($arg:tt)*) => {{
        if cfg!(any(debug_assertions, feature = "checked")) {
            panic!($($arg)*);
        } else {
            log::error!($($arg)*);
        }
    }};
}
