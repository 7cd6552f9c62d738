//! `tikconf get` - read parameters or whole records from a facility

use anyhow::{Context as AnyhowContext, Result};
use declarative::{Extraction, FacilityTask, Mode, Source};
use routeros::predicate::RAW_KEY;
use routeros::{Condition, Facility, FacilityPath, FacilityShape, FindSpec, Predicate, Value};
use serde_json::{Map, Value as Json};

use super::open_one;
use crate::Context;
use crate::cli::GetArgs;
use crate::engine::Session;
use crate::ui;

pub fn run(ctx: &Context, args: GetArgs) -> Result<()> {
    let path = FacilityPath::parse(&args.path)?;
    let find = find_spec(&args.find);
    let mut session = open_one(ctx, args.device.as_deref(), args.snapshot.as_deref(), None)?;

    let values = read(&mut session, path, find, args.all, &args.fields)
        .with_context(|| format!("Could not read {}", args.path))?;

    if ctx.json {
        println!("{}", serde_json::to_string_pretty(&values)?);
    } else {
        print_values(&values);
    }
    Ok(())
}

/// Find criteria from `key=value` pairs, with the same sentinels as task files
fn find_spec(pairs: &[(String, String)]) -> Option<FindSpec> {
    if pairs.is_empty() {
        return None;
    }
    let mut spec = FindSpec::new();
    for (key, value) in pairs {
        let condition = if key == RAW_KEY {
            Condition::Raw(value.clone())
        } else {
            Condition::parse(Some(&Value::str(value.as_str())))
        };
        spec.insert(key.clone(), condition);
    }
    Some(spec)
}

fn read(
    session: &mut Session,
    path: FacilityPath,
    find: Option<FindSpec>,
    all: bool,
    fields: &[String],
) -> Result<Json> {
    let many = all || find.is_some();

    if fields.is_empty() {
        let shape = if many {
            FacilityShape::Unordered
        } else {
            FacilityShape::Singleton
        };
        let mut facility = Facility::new(session.backend(), path, shape);
        return Ok(if many {
            let predicate = match find {
                Some(spec) => Predicate::new(spec)?,
                None => Predicate::all(),
            };
            serde_json::to_value(facility.read(&predicate)?)?
        } else {
            serde_json::to_value(facility.read_one()?)?
        });
    }

    let extraction = Extraction {
        find: if many { Some(find.unwrap_or_default()) } else { None },
        fields: fields.iter().map(|f| (f.clone(), f.clone())).collect(),
        source: Source::Fields,
        many,
        index_by: None,
        skip_empty: false,
        require_match: !many,
        require_fields: false,
    };
    let task = FacilityTask::new(path, Mode::Extract(extraction))?;
    let plan = declarative::plan(&task, session.backend())?;
    Ok(Json::Object(plan.return_values))
}

fn print_values(values: &Json) {
    match values {
        Json::Object(map) => print_map(map),
        Json::Array(records) => {
            for (index, record) in records.iter().enumerate() {
                ui::section(&format!("#{}", index + 1));
                match record {
                    Json::Object(map) => print_map(map),
                    other => println!("  {other}"),
                }
            }
        }
        other => println!("{other}"),
    }
}

fn print_map(map: &Map<String, Json>) {
    for (key, value) in map {
        let text = match value {
            Json::String(s) => s.clone(),
            other => other.to_string(),
        };
        ui::kv(key, &text);
    }
}
