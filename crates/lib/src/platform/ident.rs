/// Lowercase platform component: ASCII letters, digits and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(super) struct Ident(String);

impl Ident {
  pub(super) fn known(name: &'static str) -> Self {
    Self(name.to_string())
  }

  pub(super) fn as_str(&self) -> &str {
    &self.0
  }
}

pub(super) fn parse(input: &str, what: &str) -> Result<Ident, String> {
  let name = input.trim().to_ascii_lowercase();
  if name.is_empty() {
    return Err(format!("empty {what}"));
  }
  if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
    return Err(format!("invalid {what}: {input}"));
  }
  Ok(Ident(name))
}
