//! Read-only value extraction (`get`, `get_list`, `get_expr`, `get_expr_list`)

use crate::task::{Extraction, IndexBy, Source};
use routeros::{Error, Facility, Predicate, Record, Result, codec};
use serde_json::{Map, Value as Json};

/// Extract values from the records an extraction selects.
///
/// Without `index_by` a single-record extraction maps each alias to its
/// value and a list extraction maps each alias to an array. With
/// `index_by` every alias maps to an object keyed by the index.
pub fn extract(facility: &mut Facility<'_>, extraction: &Extraction) -> Result<Map<String, Json>> {
    let records = match &extraction.find {
        None => vec![facility.read_one()?],
        Some(find) => facility.read(&Predicate::new(find.clone())?.excluding_dynamic())?,
    };
    let what = match &extraction.find {
        Some(find) => format!("{} where {find}", facility.path()),
        None => facility.path().to_string(),
    };

    if records.is_empty() && extraction.require_match {
        return Err(Error::not_found(what.clone()));
    }
    if !extraction.many && records.len() > 1 {
        return Err(Error::AmbiguousMatch {
            what,
            count: records.len(),
        });
    }

    let mut out = Map::new();
    if extraction.many {
        for (alias, _) in &extraction.fields {
            let empty = match extraction.index_by {
                Some(_) => Json::Object(Map::new()),
                None => Json::Array(Vec::new()),
            };
            out.insert(alias.clone(), empty);
        }
    }

    for record in &records {
        let index = match &extraction.index_by {
            None => None,
            Some(IndexBy::Literal(index)) => Some(index.clone()),
            Some(IndexBy::Key(key)) => match index_of(facility, extraction, record, key)? {
                Some(index) => Some(index),
                None if extraction.require_fields => {
                    return Err(Error::not_found(format!("index {key} of {what}")));
                }
                None => continue,
            },
        };
        for (alias, value) in row(facility, extraction, record)? {
            insert(&mut out, extraction.many, index.as_deref(), alias, value)?;
        }
    }
    Ok(out)
}

/// Values of one record, by alias.
fn row(facility: &mut Facility<'_>, extraction: &Extraction, record: &Record) -> Result<Vec<(String, Json)>> {
    match extraction.source {
        Source::Fields => {
            let mut values = Vec::with_capacity(extraction.fields.len());
            for (alias, field) in &extraction.fields {
                match record.get(field) {
                    Some(value) => values.push((alias.clone(), serde_json::to_value(value)?)),
                    None if extraction.require_fields => {
                        return Err(Error::not_found(format!("field {field} in {}", facility.path())));
                    }
                    None => values.push((alias.clone(), Json::Null)),
                }
            }
            Ok(values)
        }
        Source::Expressions => Ok(facility
            .evaluate(record.id.as_ref(), &extraction.fields)?
            .into_iter()
            .filter(|(_, text)| !(extraction.skip_empty && text.is_empty()))
            .map(|(alias, text)| (alias, Json::String(text)))
            .collect()),
    }
}

fn index_of(facility: &mut Facility<'_>, extraction: &Extraction, record: &Record, key: &str) -> Result<Option<String>> {
    match extraction.source {
        Source::Fields => Ok(record.get(key).map(codec::text)),
        Source::Expressions => {
            let exprs = [(key.to_string(), key.to_string())];
            let evaluated = facility.evaluate(record.id.as_ref(), &exprs)?;
            Ok(evaluated.into_iter().next().map(|(_, text)| text))
        }
    }
}

fn insert(out: &mut Map<String, Json>, many: bool, index: Option<&str>, alias: String, value: Json) -> Result<()> {
    match (many, index) {
        (false, None) => {
            out.insert(alias, value);
        }
        (true, None) => {
            if let Some(Json::Array(items)) = out.get_mut(&alias) {
                items.push(value);
            }
        }
        (_, Some(index)) => {
            let entry = out
                .entry(alias.clone())
                .or_insert_with(|| Json::Object(Map::new()));
            if let Json::Object(map) = entry {
                if map.contains_key(index) {
                    return Err(Error::DuplicateKey {
                        key: format!("{alias}[{index}]"),
                    });
                }
                map.insert(index.to_string(), value);
            }
        }
    }
    Ok(())
}
