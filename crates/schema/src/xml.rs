use std::collections::HashMap;

use crate::dict::{XdbXNm, XdbXQn};
use crate::store::DictStore;

/// Token dictionaries for one binary-XMLType storage (`tokSuf`): qualified
/// names and namespace URIs addressed by the dictionary codes that appear in
/// the encoded document.
#[derive(Clone, Debug, Default)]
pub struct XmlDicts {
    pub namespaces: HashMap<u32, String>,
    pub qnames: HashMap<u32, QName>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QName {
    pub namespace_id: u32,
    pub local_name: String,
}

/// All token sets, keyed by `tokSuf`, rebuilt from the XDB shadow tables.
#[derive(Clone, Debug, Default)]
pub struct XmlCtx {
    by_suffix: HashMap<String, XmlDicts>,
}

impl XmlCtx {
    pub fn rebuild(nm: &DictStore<XdbXNm>, qn: &DictStore<XdbXQn>) -> XmlCtx {
        let mut by_suffix: HashMap<String, XmlDicts> = HashMap::new();
        for row in nm.iter() {
            by_suffix
                .entry(row.tok_suf.clone())
                .or_default()
                .namespaces
                .insert(row.id, row.nmspc_uri.clone());
        }
        for row in qn.iter() {
            by_suffix.entry(row.tok_suf.clone()).or_default().qnames.insert(
                row.id,
                QName {
                    namespace_id: row.nmspc_id,
                    local_name: row.local_name.clone(),
                },
            );
        }
        XmlCtx { by_suffix }
    }

    pub fn dicts(&self, tok_suf: &str) -> Option<&XmlDicts> {
        self.by_suffix.get(tok_suf)
    }

    pub fn is_empty(&self) -> bool {
        self.by_suffix.is_empty()
    }
}

impl XmlDicts {
    pub fn qname(&self, id: u32) -> Option<&QName> {
        self.qnames.get(&id)
    }

    pub fn namespace(&self, id: u32) -> Option<&str> {
        self.namespaces.get(&id).map(String::as_str)
    }
}
