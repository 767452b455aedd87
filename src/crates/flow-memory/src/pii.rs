//! PII scrubbing applied to generated memory content before storage (§4.6
//! step 5): emails and IPv4 addresses replaced with `[email]`/`[ip]`.

use crate::types::PiiPolicy;
use regex::Regex;

pub fn scrub(policy: &PiiPolicy, text: &str) -> String {
    match policy {
        PiiPolicy::None => text.to_string(),
        PiiPolicy::StripEmailIp => {
            let email_re = Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("static regex");
            let ip_re = Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("static regex");
            let scrubbed = email_re.replace_all(text, "[email]");
            ip_re.replace_all(&scrubbed, "[ip]").into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_emails_and_ips() {
        let out = scrub(&PiiPolicy::StripEmailIp, "contact me at a@b.com from 10.0.0.1");
        assert_eq!(out, "contact me at [email] from [ip]");
    }

    #[test]
    fn none_policy_is_a_no_op() {
        assert_eq!(scrub(&PiiPolicy::None, "a@b.com"), "a@b.com");
    }
}
