//! Binding and routing key grammar, plus the topic match algorithm.
//!
//! Keys are dot-separated token strings. A routing key carries only literal
//! tokens; a binding key may additionally use `*` (exactly one token) and `#`
//! (zero or more tokens). Adjacent wildcard pairs other than `*.*` are
//! rejected because the scan below cannot anchor them.

/// A literal token is one or more characters from `[A-Za-z0-9_]`.
#[inline]
fn valid_token(token: &str) -> bool {
    !token.is_empty() && token.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

#[inline]
fn wildcard(token: &str) -> bool {
    token == "*" || token == "#"
}

/// An empty key is valid; otherwise every token must be a literal.
pub fn validate_routing_key(key: &str) -> bool {
    if key.is_empty() {
        return true;
    }
    key.split('.').all(valid_token)
}

/// An empty key is valid; otherwise every token must be a literal or a
/// wildcard, and of the adjacent wildcard pairs only `*.*` is allowed.
pub fn validate_binding_key(key: &str) -> bool {
    if key.is_empty() {
        return true;
    }
    let mut prev: Option<&str> = None;
    for token in key.split('.') {
        if !wildcard(token) && !valid_token(token) {
            return false;
        }
        if let Some(prev) = prev {
            if wildcard(prev) && wildcard(token) && !(prev == "*" && token == "*") {
                return false;
            }
        }
        prev = Some(token);
    }
    true
}

/// Matches a routing key against a binding key pattern.
///
/// `*` consumes exactly one routing token. `#` consumes zero or more tokens
/// by scanning forward to the first routing token equal to the literal that
/// follows it; the scan never backtracks, so a repeated token after a `#` can
/// produce a false negative (`a.#.b.c` against `a.b.b.c`). That behavior is
/// kept as is, consumers may depend on it.
pub fn match_topic(binding_key: &str, routing_key: &str) -> bool {
    if binding_key == routing_key {
        return true;
    }

    let bts: Vec<&str> = binding_key.split('.').collect();
    let rts: Vec<&str> = routing_key.split('.').collect();

    let mut bi = 0;
    let mut ri = 0;
    while bi < bts.len() && ri < rts.len() {
        let bt = bts[bi];
        if bt == "#" {
            bi += 1;
            if bi >= bts.len() {
                // trailing #, everything left matches
                return true;
            }
            let next = bts[bi];
            let mut found = false;
            while ri < rts.len() {
                if rts[ri] == next {
                    found = true;
                    break;
                }
                ri += 1;
            }
            if !found {
                return false;
            }
        } else if bt == "*" || bt == rts[ri] {
            bi += 1;
            ri += 1;
        } else {
            return false;
        }
    }
    bi == bts.len() && ri == rts.len()
}
