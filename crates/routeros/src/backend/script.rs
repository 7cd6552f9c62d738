//! Live device backend rendering RouterOS CLI scripts.

use crate::backend::Backend;
use crate::codec::{self, RECORD_START, RESPONSE_END};
use crate::error::{Error, Result};
use crate::predicate::Predicate;
use crate::retry::{self, LogCallback};
use crate::transport::Transport;
use crate::types::{Assignment, Assignments, FacilityPath, ItemId, Record, RetryConfig};

/// Backend that sends RouterOS scripts through a [`Transport`].
pub struct ScriptBackend<T: Transport> {
    transport: T,
    retry: RetryConfig,
}

impl<T: Transport> ScriptBackend<T> {
    /// Create a backend over a transport with the default read retry.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            retry: RetryConfig::default(),
        }
    }

    /// Use a custom retry policy for reads.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a read-only script, retrying on timeouts, and decode its records.
    fn query(&mut self, script: &str) -> Result<Vec<Record>> {
        let retry = &self.retry;
        let transport = &mut self.transport;
        let response = retry::with_retry(retry, Some(&LogCallback), || transport.send(script))?;

        if response.contains(RESPONSE_END) {
            return codec::decode_records(&response);
        }
        Err(Error::from_response(script, &response).unwrap_or_else(|| Error::CommandFailed {
            command: script.to_string(),
            message: format!("unexpected response: {}", response.trim()),
        }))
    }

    /// Send a mutating script exactly once.
    fn command(&mut self, script: &str) -> Result<String> {
        let response = self.transport.send(script)?;
        if let Some(err) = Error::from_response(script, &response) {
            return Err(err);
        }
        Ok(response)
    }
}

fn render_values(values: &Assignments, allow_unset: bool) -> Result<String> {
    let mut out = String::new();
    for (key, assignment) in values {
        match assignment {
            Assignment::Value(v) => {
                out.push(' ');
                out.push_str(key);
                out.push('=');
                out.push_str(&codec::encode_for_write(v)?);
            }
            Assignment::Unset if allow_unset => {
                out.push_str(" !");
                out.push_str(key);
            }
            Assignment::Unset => {}
        }
    }
    Ok(out)
}

const DUMP_RECORD: &str = ":foreach k,v in=$r do={:put (\"$k|\" . [:typeof $v] . \"|\" . [:tostr $v])}";

/// Script printing every matching record of a multi-record facility.
pub fn read_script(path: &FacilityPath, predicate: &Predicate) -> Result<String> {
    let filter = predicate.filter_expression()?;
    let find = if filter.is_empty() {
        format!("[{path} find]")
    } else {
        format!("[{path} find where {filter}]")
    };
    Ok(format!(
        ":foreach i in={find} do={{:local r [{path} get $i]; :put \"{RECORD_START}\"; :put \".id|id|$i\"; {DUMP_RECORD}}}; :put \"{RESPONSE_END}\""
    ))
}

/// Script printing the record of a singleton facility.
pub fn read_singleton_script(path: &FacilityPath) -> String {
    format!(":local r [{path} get]; :put \"{RECORD_START}\"; {DUMP_RECORD}; :put \"{RESPONSE_END}\"")
}

/// Script evaluating expressions with a record's parameters as locals.
pub fn evaluate_script(path: &FacilityPath, id: Option<&ItemId>, exprs: &[(String, String)]) -> Result<String> {
    let target = id.map(|i| format!(" {i}")).unwrap_or_default();
    let mut table = Vec::with_capacity(exprs.len());
    for (alias, expr) in exprs {
        table.push(format!("{}={}", codec::encode_forced(alias)?, codec::encode_forced(expr)?));
    }
    Ok(format!(
        ":local s [{path} get{target}]; :local p \"\"; :foreach k,v in=$s do={{:set p ($p . \" :local \\\"$k\\\" \\\"$v\\\";\")}}; :put \"{RECORD_START}\"; :foreach n,e in={{{}}} do={{:local r [[:parse \"$p :return $e\"]]; :put (\"$n|str|\" . [:tostr $r])}}; :put \"{RESPONSE_END}\"",
        table.join(";")
    ))
}

impl<T: Transport> Backend for ScriptBackend<T> {
    fn read_singleton(&mut self, path: &FacilityPath) -> Result<Record> {
        let mut records = self.query(&read_singleton_script(path))?;
        if records.len() != 1 {
            return Err(Error::CommandFailed {
                command: format!("{path} get"),
                message: format!("expected one record, got {}", records.len()),
            });
        }
        Ok(records.remove(0))
    }

    fn read(&mut self, path: &FacilityPath, predicate: &Predicate) -> Result<Vec<Record>> {
        self.query(&read_script(path, predicate)?)
    }

    fn add(&mut self, path: &FacilityPath, values: &Assignments, place_before: Option<&ItemId>) -> Result<ItemId> {
        let mut script = format!(":put [{path} add{}", render_values(values, false)?);
        if let Some(before) = place_before {
            script.push_str(&format!(" place-before={before}"));
        }
        script.push(']');

        let response = self.command(&script)?;
        match response.lines().map(str::trim).rfind(|l| !l.is_empty()) {
            Some(id) if id.starts_with('*') => Ok(ItemId::new(id)),
            _ => Err(Error::CommandFailed {
                command: script,
                message: format!("add did not return an item id: {}", response.trim()),
            }),
        }
    }

    fn remove(&mut self, path: &FacilityPath, id: &ItemId) -> Result<()> {
        self.command(&format!("{path} remove {id}")).map(drop)
    }

    fn set(&mut self, path: &FacilityPath, id: Option<&ItemId>, values: &Assignments) -> Result<()> {
        let target = id.map(|i| format!(" {i}")).unwrap_or_default();
        let script = format!("{path} set{target}{}", render_values(values, true)?);
        self.command(&script).map(drop)
    }

    fn move_item(&mut self, path: &FacilityPath, id: &ItemId, before: Option<&ItemId>) -> Result<()> {
        let script = match before {
            Some(before) => format!("{path} move {id} destination={before}"),
            None => format!("{path} move {id}"),
        };
        self.command(&script).map(drop)
    }

    fn set_disabled(&mut self, path: &FacilityPath, id: &ItemId, disabled: bool) -> Result<()> {
        let verb = if disabled { "disable" } else { "enable" };
        self.command(&format!("{path} {verb} {id}")).map(drop)
    }

    fn evaluate(
        &mut self,
        path: &FacilityPath,
        id: Option<&ItemId>,
        exprs: &[(String, String)],
    ) -> Result<Vec<(String, String)>> {
        let records = self.query(&evaluate_script(path, id, exprs)?)?;
        let record = records.into_iter().next().unwrap_or_default();
        Ok(exprs
            .iter()
            .map(|(alias, _)| {
                let text = record.get(alias).map(codec::text).unwrap_or_default();
                (alias.clone(), text)
            })
            .collect())
    }

    fn run(&mut self, command: &str) -> Result<String> {
        self.command(command)
    }
}
