use engine_core::{connectors::source::Page, error::SourceError};
use model::records::record::Record;
use serde_json::{Map, Value, json};
use tracing::warn;

const READY_STATUS: &str = "SUCCESS";

/// How records are laid out inside a page body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLayout {
    /// `data.campaigns[].ads[].metrics[]`, flattened to one record per metric.
    Nested,
    /// An array of ready-made records under `records_key`.
    Flat { records_key: String },
}

/// Turns a decoded response body into a [`Page`].
///
/// A body whose `status` is anything but `SUCCESS` is a report still being
/// prepared and comes back as [`SourceError::NotReady`].
pub fn parse_page(layout: &ResponseLayout, body: &Value) -> Result<Page, SourceError> {
    let status = body.get("status").and_then(Value::as_str).unwrap_or("");
    if status != READY_STATUS {
        return Err(SourceError::NotReady {
            status: if status.is_empty() {
                "missing".to_string()
            } else {
                status.to_string()
            },
        });
    }

    let records = match layout {
        ResponseLayout::Nested => flatten_campaigns(body),
        ResponseLayout::Flat { records_key } => flat_records(body, records_key)?,
    };

    let has_next = body
        .get("hasNextPage")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let next_cursor = if has_next {
        body.get("nextCursor")
            .and_then(Value::as_str)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    Ok(Page {
        records,
        next_cursor,
    })
}

fn flat_records(body: &Value, records_key: &str) -> Result<Vec<Record>, SourceError> {
    let items = body
        .get(records_key)
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::Decode(format!("expected an array under '{records_key}'")))?;

    let mut records = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        match item.as_object() {
            Some(obj) => records.push(obj.clone()),
            None => warn!(index, "Skipping non-object record"),
        }
    }
    Ok(records)
}

fn flatten_campaigns(body: &Value) -> Vec<Record> {
    let mut records = Vec::new();
    let campaigns = body
        .get("data")
        .and_then(|d| d.get("campaigns"))
        .and_then(Value::as_array);
    let Some(campaigns) = campaigns else {
        return records;
    };

    for campaign in campaigns {
        let Some(campaign) = campaign.as_object() else {
            warn!("Skipping malformed campaign node");
            continue;
        };
        let campaign_name = str_field(campaign, "name");

        for ad in array_field(campaign, "ads") {
            let Some(ad) = ad.as_object() else {
                warn!(campaign = %campaign_name, "Skipping malformed ad node");
                continue;
            };
            let ad_name = str_field(ad, "name");

            for metric in array_field(ad, "metrics") {
                let Some(metric) = metric.as_object() else {
                    warn!(campaign = %campaign_name, ad = %ad_name, "Skipping malformed metric node");
                    continue;
                };

                let mut record = Map::new();
                record.insert("campaign".into(), Value::String(campaign_name.clone()));
                record.insert("ad_name".into(), Value::String(ad_name.clone()));
                record.insert(
                    "date".into(),
                    metric.get("date").cloned().unwrap_or_else(|| json!("")),
                );
                for name in ["cost", "impressions", "clicks", "conversions", "revenue"] {
                    record.insert(
                        name.into(),
                        metric.get(name).cloned().unwrap_or_else(|| json!(0)),
                    );
                }
                records.push(record);
            }
        }
    }
    records
}

fn str_field(node: &Map<String, Value>, key: &str) -> String {
    node.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn array_field<'a>(node: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    node.get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}
