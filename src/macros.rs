/// Logs a message at the error level than panics with a message of
/// "fatal error".
#[macro_export]
macro_rules! fatal {
  (target: $target:expr, $($arg:tt)*) => ({
    log!(target: $target, ::log::Level::Error, $($arg)*);
    panic!("fatal error");
  });
  ($($arg:tt)*) => ({
    log!(::log::Level::Error, $($arg)*);
    panic!("fatal error");
  });
}
