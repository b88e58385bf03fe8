//! Terse macros for everyday usage

/// Builds a `CommandSpec` from a program and arguments.
#[macro_export]
macro_rules! sp_cmd {
    ($prog:expr $(, $arg:expr )* $(,)?) => {{
        $crate::cmd::CommandSpec::new($prog) $( .arg($arg) )*
    }};
}

/// Builds an env-override map for `RunOptions::envs`.
#[macro_export]
macro_rules! sp_env {
    ( $( $k:expr => $v:expr ),* $(,)? ) => {{
        let mut __env = ::std::collections::BTreeMap::<::std::string::String, ::std::string::String>::new();
        $( __env.insert(::std::string::String::from($k), ::std::string::String::from($v)); )*
        __env
    }};
}
