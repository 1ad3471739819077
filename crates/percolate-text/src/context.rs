//! Ephemeral single-document evaluation context.
//!
//! Every scalar leaf of the document is indexed under its dotted path, with
//! string values run through the analyzer. Every object found below the root
//! is also kept as a nested sub-context under its path, so `nested` queries can
//! require all of their clauses to hold inside one repeated element.
//!
//! Each object is walked once. Its sub-context is merged into the parent and
//! shared by `Arc`, so deep documents do not re-walk their subtrees.
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde_json::{Map, Value};

use percolate_core::CanonicalDoc;

use crate::tantivy_utils::{AnalyzedToken, Analyzer};

#[derive(Debug, Clone)]
pub struct IndexedValue {
    pub raw: Value,
    pub tokens: Vec<AnalyzedToken>,
}

#[derive(Debug, Clone, Default)]
pub struct FieldData {
    pub values: Vec<IndexedValue>,
    terms: HashSet<String>,
}

impl FieldData {
    pub fn contains_term(&self, term: &str) -> bool { self.terms.contains(term) }
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    fields: HashMap<String, FieldData>,
    nested: HashMap<String, Vec<Arc<EvaluationContext>>>,
}

impl EvaluationContext {
    pub fn build(doc: &CanonicalDoc, analyzer: &mut Analyzer) -> Self {
        let mut ctx = Self::default();
        ctx.index_object("", doc.fields(), analyzer);
        ctx
    }

    pub fn field(&self, path: &str) -> Option<&FieldData> { self.fields.get(path) }

    pub fn nested(&self, path: &str) -> &[Arc<EvaluationContext>] {
        self.nested.get(path).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn exists(&self, path: &str) -> bool { self.fields.contains_key(path) || self.nested.contains_key(path) }

    fn index_object(&mut self, prefix: &str, obj: &Map<String, Value>, analyzer: &mut Analyzer) {
        for (key, value) in obj {
            let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };
            self.index_value(&path, value, analyzer);
        }
    }

    fn index_value(&mut self, path: &str, value: &Value, analyzer: &mut Analyzer) {
        match value {
            Value::Null => {}
            Value::Object(obj) => {
                let mut sub = Self::default();
                sub.index_object(path, obj, analyzer);
                self.absorb(&sub);
                self.nested.entry(path.to_string()).or_default().push(Arc::new(sub));
            }
            Value::Array(items) => for item in items { self.index_value(path, item, analyzer); },
            scalar => {
                let tokens = match scalar {
                    Value::String(s) => analyzer.analyze(s),
                    other => vec![AnalyzedToken { text: other.to_string().to_lowercase(), position: 0 }],
                };
                let field = self.fields.entry(path.to_string()).or_default();
                field.terms.extend(tokens.iter().map(|t| t.text.clone()));
                field.values.push(IndexedValue { raw: scalar.clone(), tokens });
            }
        }
    }

    fn absorb(&mut self, sub: &EvaluationContext) {
        for (path, data) in &sub.fields {
            let field = self.fields.entry(path.clone()).or_default();
            field.values.extend(data.values.iter().cloned());
            field.terms.extend(data.terms.iter().cloned());
        }
        for (path, groups) in &sub.nested {
            self.nested.entry(path.clone()).or_default().extend(groups.iter().cloned());
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use serde_json::json;

    use super::*;
    use percolate_core::content::decode;

    #[test]
    fn flattens_paths_and_keeps_nested_groups() {
        let doc = decode(br#"{"companyname":"stark","employee":[{"name":"virginia potts"},{"name":"tony stark"}],"n":3}"#, None).expect("doc");
        let mut analyzer = Analyzer::default();
        let ctx = EvaluationContext::build(&doc, &mut analyzer);

        let names = ctx.field("employee.name").expect("flattened");
        assert!(names.contains_term("potts") && names.contains_term("tony"));
        assert_eq!(names.values.len(), 2);
        assert_eq!(ctx.nested("employee").len(), 2);
        assert!(ctx.nested("employee")[0].field("employee.name").expect("sub").contains_term("virginia"));
        assert!(!ctx.nested("employee")[0].field("employee.name").expect("sub").contains_term("tony"));
        assert!(ctx.field("n").expect("n").contains_term("3"));
        assert!(ctx.exists("employee") && !ctx.exists("missing"));
    }

    #[test]
    fn deep_single_path_documents_build_quickly() {
        const DEPTH: usize = 48;
        let mut value = json!({"leaf": "bottom value"});
        for _ in 0..DEPTH { value = json!({"o": value}); }
        let Value::Object(fields) = value else { panic!("object") };
        let doc = CanonicalDoc::new(fields);

        let started = Instant::now();
        let ctx = EvaluationContext::build(&doc, &mut Analyzer::default());
        assert!(started.elapsed() < Duration::from_secs(2), "took {:?}", started.elapsed());

        let leaf = format!("{}leaf", "o.".repeat(DEPTH));
        assert_eq!(ctx.field(&leaf).expect("leaf").values.len(), 1);
        let mut path = "o".to_string();
        let mut sub = ctx.nested(&path)[0].clone();
        for _ in 1..DEPTH {
            path.push_str(".o");
            assert_eq!(ctx.nested(&path).len(), 1, "one group at {path}");
            sub = sub.nested(&path)[0].clone();
        }
        assert!(sub.field(&leaf).expect("innermost").contains_term("bottom"));
    }
}
