mod set_once;

pub use set_once::*;

/// Indents every non-empty line of `s` by `n` levels of two spaces.
pub fn indent<S: AsRef<str>>(s: S, n: usize) -> String {
    let pad = "  ".repeat(n);
    map_join(s.as_ref().lines(), "\n", |line| {
        if line.is_empty() {
            String::new()
        } else {
            format!("{}{}", pad, line)
        }
    })
}

pub fn join<'a, T, S>(i: T, sep: S) -> String
where
    T: IntoIterator,
    T::Item: ToString,
    S: Into<&'a str>,
{
    i.into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(sep.into())
}

pub fn map_join<'a, T, S, F>(i: T, sep: S, f: F) -> String
where
    T: IntoIterator,
    S: Into<&'a str>,
    F: Fn(T::Item) -> String,
{
    i.into_iter().map(f).collect::<Vec<_>>().join(sep.into())
}
