//! Actor claims and a small boolean-expression evaluator for
//! subscription-level actor constraints (§4.5 step 5, §4.2 "actorConstraint").

use std::collections::BTreeMap;

/// Deserialized `Actor-*` headers (§6 table).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActorClaims {
    pub claims: BTreeMap<String, String>,
}

impl ActorClaims {
    pub fn from_headers<'a>(headers: impl IntoIterator<Item = (&'a String, &'a String)>) -> Option<Self> {
        let mut claims = BTreeMap::new();
        for (k, v) in headers {
            if let Some(name) = k.strip_prefix(crate::frame::headers::ACTOR_PREFIX) {
                claims.insert(name.to_string(), v.clone());
            }
        }
        if claims.is_empty() {
            None
        } else {
            Some(Self { claims })
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.claims.get(key).map(String::as_str)
    }
}

/// Evaluates a tiny constraint grammar over actor claims:
/// `claim == "value"`, `claim != "value"`, `claim`, `!claim`, joined by
/// `&&` / `||` left-to-right (no operator precedence beyond that — a
/// narrow boolean expression over actor claims, not a full expression
/// language).
pub fn evaluate_actor_constraint(expr: &str, claims: &ActorClaims) -> bool {
    if expr.trim().is_empty() {
        return true;
    }
    if let Some((lhs, rhs)) = split_top_level(expr, "||") {
        return evaluate_actor_constraint(&lhs, claims) || evaluate_actor_constraint(&rhs, claims);
    }
    if let Some((lhs, rhs)) = split_top_level(expr, "&&") {
        return evaluate_actor_constraint(&lhs, claims) && evaluate_actor_constraint(&rhs, claims);
    }
    evaluate_atom(expr.trim(), claims)
}

fn split_top_level(expr: &str, op: &str) -> Option<(String, String)> {
    expr.find(op)
        .map(|idx| (expr[..idx].to_string(), expr[idx + op.len()..].to_string()))
}

fn evaluate_atom(atom: &str, claims: &ActorClaims) -> bool {
    if let Some(key) = atom.strip_prefix('!') {
        return claims.get(key.trim()).is_none();
    }
    if let Some((key, value)) = atom.split_once("!=") {
        let expected = value.trim().trim_matches('"');
        return claims.get(key.trim()) != Some(expected);
    }
    if let Some((key, value)) = atom.split_once("==") {
        let expected = value.trim().trim_matches('"');
        return claims.get(key.trim()) == Some(expected);
    }
    claims.get(atom).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(pairs: &[(&str, &str)]) -> ActorClaims {
        ActorClaims {
            claims: pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn equality_atom() {
        let c = claims(&[("role", "admin")]);
        assert!(evaluate_actor_constraint(r#"role == "admin""#, &c));
        assert!(!evaluate_actor_constraint(r#"role == "user""#, &c));
    }

    #[test]
    fn presence_and_negation() {
        let c = claims(&[("role", "admin")]);
        assert!(evaluate_actor_constraint("role", &c));
        assert!(!evaluate_actor_constraint("!role", &c));
        assert!(evaluate_actor_constraint("!missing", &c));
    }

    #[test]
    fn conjunction_and_disjunction() {
        let c = claims(&[("role", "admin"), ("tenant", "acme")]);
        assert!(evaluate_actor_constraint(r#"role == "admin" && tenant == "acme""#, &c));
        assert!(!evaluate_actor_constraint(r#"role == "user" && tenant == "acme""#, &c));
        assert!(evaluate_actor_constraint(r#"role == "user" || tenant == "acme""#, &c));
    }

    #[test]
    fn empty_expression_always_passes() {
        let c = ActorClaims::default();
        assert!(evaluate_actor_constraint("", &c));
    }
}
