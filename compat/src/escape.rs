use std::borrow::Cow;

/// Undo the HTML escaping some queue transports apply to message
/// bodies: `&lt;` and `&gt;` arrive in place of `<` and `>`.
///
/// This is an upstream wart, not a feature; nothing else is unescaped,
/// and the encoder never escapes.
pub fn unescape_transport(s: &str) -> Cow<'_, str> {
    if !s.contains("&lt;") && !s.contains("&gt;") {
        return Cow::Borrowed(s);
    }

    Cow::Owned(s.replace("&lt;", "<").replace("&gt;", ">"))
}

#[cfg(test)]
mod tests {
    use super::unescape_transport;
    use std::borrow::Cow;

    #[test]
    fn untouched_input_is_borrowed() {
        assert!(matches!(
            unescape_transport("{\"builder\":\"/bin/sh\"}"),
            Cow::Borrowed(_)
        ));
    }

    #[test]
    fn unescapes_angle_brackets_only() {
        assert_eq!(
            "/store/x<>y &amp; &quot;",
            unescape_transport("/store/x&lt;&gt;y &amp; &quot;")
        );
    }
}
