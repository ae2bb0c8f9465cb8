use bson::{Bson, Document};

/// One update operator, applied at a field path.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationOp {
    /// Write the value at the path, creating the field when absent.
    Set(Bson),
    /// Delete the field entirely.
    Unset,
    /// Add a numeric amount to the current value; negative amounts
    /// decrement.
    Inc(Bson),
    /// Push onto the tail of an array field, creating the array when
    /// absent.
    Push(Bson),
    /// Drop an array field's last element.
    Pop,
    /// Move the value under a new key; the payload is the target name.
    Rename(String),
}

/// A field path paired with the operator to run there.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldMutation {
    pub field: String,
    pub op: MutationOp,
}

/// A parsed update document: the ordered field operators to apply.
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub ops: Vec<FieldMutation>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MutationParseError(pub String);

impl std::fmt::Display for MutationParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "mutation parse error: {}", self.0)
    }
}

impl std::error::Error for MutationParseError {}

/// Parse an update document into a [`Mutation`].
///
/// A document with `$`-operator keys parses to those operators. A document
/// with no `$` keys is a field merge: each top-level entry becomes a `Set`.
/// Mixing the two forms is rejected.
pub fn parse_mutation(doc: &Document) -> Result<Mutation, MutationParseError> {
    let has_operators = doc.keys().any(|k| k.starts_with('$'));
    let mut ops = Vec::new();

    if !has_operators {
        for (key, val) in doc.iter() {
            ops.push(FieldMutation {
                field: key.clone(),
                op: MutationOp::Set(val.clone()),
            });
        }
        return Ok(Mutation { ops });
    }

    for (key, val) in doc.iter() {
        if !key.starts_with('$') {
            return Err(MutationParseError(format!(
                "cannot mix operator and plain keys: `{key}`"
            )));
        }
        let fields = match val {
            Bson::Document(d) => d,
            _ => {
                return Err(MutationParseError(format!(
                    "{key} value must be a document"
                )));
            }
        };
        for (field, arg) in fields.iter() {
            let op = match key.as_str() {
                "$set" => MutationOp::Set(arg.clone()),
                "$unset" => MutationOp::Unset,
                "$inc" => MutationOp::Inc(arg.clone()),
                "$push" => MutationOp::Push(arg.clone()),
                "$pop" => MutationOp::Pop,
                "$rename" => match arg {
                    Bson::String(new_name) => MutationOp::Rename(new_name.clone()),
                    _ => {
                        return Err(MutationParseError(
                            "$rename value must be a string".into(),
                        ));
                    }
                },
                other => {
                    return Err(MutationParseError(format!(
                        "unknown update operator: {other}"
                    )));
                }
            };
            ops.push(FieldMutation {
                field: field.clone(),
                op,
            });
        }
    }

    Ok(Mutation { ops })
}

impl Mutation {
    /// Apply this mutation to a document. Returns whether anything changed.
    ///
    /// Dotted field paths resolve through intermediate sub-documents,
    /// creating them for the creating operators (`$set`, `$inc`, `$push`).
    pub fn apply(&self, doc: &mut Document) -> bool {
        let mut changed = false;

        for fm in &self.ops {
            let creates = matches!(
                fm.op,
                MutationOp::Set(_) | MutationOp::Inc(_) | MutationOp::Push(_)
            );
            let Some((parent, leaf)) = resolve_parent_mut(doc, &fm.field, creates) else {
                continue;
            };

            match &fm.op {
                MutationOp::Set(val) => {
                    if parent.get(&leaf) != Some(val) {
                        parent.insert(leaf, val.clone());
                        changed = true;
                    }
                }
                MutationOp::Unset => {
                    changed |= parent.remove(&leaf).is_some();
                }
                MutationOp::Inc(amount) => {
                    let next = match parent.get(&leaf) {
                        Some(current) => match numeric_add(current, amount) {
                            Some(v) => v,
                            None => continue,
                        },
                        None => amount.clone(),
                    };
                    if parent.get(&leaf) != Some(&next) {
                        parent.insert(leaf, next);
                        changed = true;
                    }
                }
                MutationOp::Push(val) => match parent.get_mut(&leaf) {
                    Some(Bson::Array(arr)) => {
                        arr.push(val.clone());
                        changed = true;
                    }
                    Some(_) => {}
                    None => {
                        parent.insert(leaf, Bson::Array(vec![val.clone()]));
                        changed = true;
                    }
                },
                MutationOp::Pop => {
                    if let Some(Bson::Array(arr)) = parent.get_mut(&leaf) {
                        changed |= arr.pop().is_some();
                    }
                }
                MutationOp::Rename(new_name) => {
                    if let Some(val) = parent.remove(&leaf) {
                        parent.insert(new_name.clone(), val);
                        changed = true;
                    }
                }
            }
        }

        changed
    }
}

/// Walk to the parent document of a dotted path. Returns the parent and the
/// leaf key, or `None` when an intermediate segment is absent (and `create`
/// is false) or is not a sub-document.
fn resolve_parent_mut<'a>(
    doc: &'a mut Document,
    path: &str,
    create: bool,
) -> Option<(&'a mut Document, String)> {
    let mut parts: Vec<&str> = path.split('.').collect();
    let leaf = parts.pop()?.to_string();

    let mut current = doc;
    for part in parts {
        if !current.contains_key(part) {
            if !create {
                return None;
            }
            current.insert(part.to_string(), Document::new());
        }
        current = match current.get_mut(part) {
            Some(Bson::Document(sub)) => sub,
            _ => return None,
        };
    }

    Some((current, leaf))
}

fn numeric_add(current: &Bson, amount: &Bson) -> Option<Bson> {
    let next = match (current, amount) {
        (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a + b),
        (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
        (Bson::Int32(a), Bson::Int64(b)) | (Bson::Int64(b), Bson::Int32(a)) => {
            Bson::Int64(i64::from(*a) + b)
        }
        (a, b) => {
            let a = as_f64(a)?;
            let b = as_f64(b)?;
            Bson::Double(a + b)
        }
    };
    Some(next)
}

fn as_f64(v: &Bson) -> Option<f64> {
    match v {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}
