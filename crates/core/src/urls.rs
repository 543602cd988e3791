use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.');

pub fn profile_url(username: &str) -> String {
    let encoded = utf8_percent_encode(username.trim(), PATH_SEGMENT).to_string();
    format!("https://www.last.fm/user/{encoded}")
}

#[cfg(test)]
mod tests {
    use super::profile_url;

    #[test]
    fn profile_url_encodes_username() {
        assert_eq!(profile_url("rj_01"), "https://www.last.fm/user/rj_01");
        assert_eq!(profile_url("a b/c"), "https://www.last.fm/user/a%20b%2Fc");
    }
}
