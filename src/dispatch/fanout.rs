//! Group Fan-Out
//!
//! Serves the `fopt` virtual child of a group: the incoming request is
//! re-issued once per member, concurrently, and the member responses are
//! aggregated into a single `m2m:agr` envelope in member-list order. Each
//! derived request re-enters the dispatcher from the top, so members on
//! other nodes are forwarded exactly like directly addressed resources.

use futures::future::join_all;
use serde_json::{json, Value};
use tracing::debug;

use crate::addressing::VirtualTarget;
use crate::error::Result;
use crate::primitive::{RequestPrimitive, ResponsePrimitive, StatusCode};

use super::Dispatcher;

/// Fan a request out to every member of the group behind `target`.
pub(crate) async fn fan_out(
    dispatcher: &Dispatcher,
    request: RequestPrimitive,
    target: &VirtualTarget,
) -> Result<ResponsePrimitive> {
    let members = dispatcher.store.group_members(&target.parent_ri).await?;
    debug!(group = %target.parent_ri, members = members.len(), "fanning out");

    let derived: Vec<_> = members
        .iter()
        .map(|member| {
            let mut req = request.clone();
            req.target = match target.remainder {
                Some(ref rest) => format!("{}/{}", member, rest),
                None => member.clone(),
            };
            dispatcher.handle_boxed(req)
        })
        .collect();

    // join_all preserves submission order, so the aggregate lines up with
    // the member list even though members answer at different speeds
    let mut responses = join_all(derived).await;
    for (response, member) in responses.iter_mut().zip(members.iter()) {
        response.source = Some(member.clone());
    }

    Ok(
        ResponsePrimitive::new(StatusCode::Ok, &request.request_id)
            .with_payload(aggregate_payload(&responses)),
    )
}

/// Shape of the fan-out aggregate: `{"m2m:agr": {"m2m:rsp": [...]}}`.
pub fn aggregate_payload(responses: &[ResponsePrimitive]) -> Value {
    let entries: Vec<Value> = responses
        .iter()
        .map(|r| serde_json::to_value(r).unwrap_or(Value::Null))
        .collect();
    json!({ "m2m:agr": { "m2m:rsp": entries } })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_shape_and_order() {
        let responses = vec![
            {
                let mut r = ResponsePrimitive::new(StatusCode::Ok, "rq1");
                r.source = Some("m1".into());
                r
            },
            {
                let mut r = ResponsePrimitive::error(StatusCode::NotFound, "rq1", "gone");
                r.source = Some("m2".into());
                r
            },
        ];
        let payload = aggregate_payload(&responses);
        let entries = payload["m2m:agr"]["m2m:rsp"].as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0]["fr"], "m1");
        assert_eq!(entries[0]["rsc"], 2000);
        assert_eq!(entries[1]["fr"], "m2");
        assert_eq!(entries[1]["rsc"], 4004);
    }
}
