use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::warn;

use crate::app::{AppContext, Result, RunnelError};
use crate::domain::{QueryInput, QueryRequest};
use crate::engine::Pipeline;
use crate::refresh::{RefreshConfig, Refresher};

/// Turn command-line arguments into pipeline inputs.
///
/// JSON objects pass through untouched; plain URLs pick up `since`.
pub fn build_inputs(urls: &[String], since: Option<&str>) -> Result<Vec<QueryInput>> {
    let since = since
        .map(|s| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .map_err(|e| RunnelError::InvalidQuery(format!("since {s}: {e}")))
        })
        .transpose()?;

    Ok(urls
        .iter()
        .map(|url| {
            if url.trim_start().starts_with('{') {
                QueryInput::from(url.as_str())
            } else {
                QueryInput::from(QueryRequest {
                    since,
                    ..QueryRequest::new(url.as_str())
                })
            }
        })
        .collect())
}

/// Feed `inputs` through `pipeline`, printing each record as a JSON line.
async fn drain(mut pipeline: Pipeline, inputs: Vec<QueryInput>) -> Result<usize> {
    let sender = pipeline.sender();
    pipeline.close();

    let feeder = tokio::spawn(async move {
        if let Some(sender) = sender {
            for input in inputs {
                if sender.send(input).await.is_err() {
                    break;
                }
            }
        }
    });

    let mut printed = 0;
    while let Some(result) = pipeline.next_result().await {
        match result {
            Ok(output) => {
                println!("{}", output.to_json()?);
                printed += 1;
            }
            Err(e) => warn!(error = %e, "Query failed"),
        }
    }

    feeder
        .await
        .map_err(|e| RunnelError::Other(format!("input task failed: {e}")))?;
    Ok(printed)
}

pub async fn feeds(ctx: &AppContext, urls: &[String]) -> Result<()> {
    let inputs = build_inputs(urls, None)?;
    drain(ctx.cache.feeds(), inputs).await?;
    Ok(())
}

pub async fn entries(ctx: &AppContext, urls: &[String], since: Option<&str>) -> Result<()> {
    let inputs = build_inputs(urls, since)?;
    drain(ctx.cache.entries(), inputs).await?;
    // the counter lives in memory, so persist this run's hits before exiting
    ctx.cache.flush_counter()?;
    Ok(())
}

pub async fn update(ctx: &AppContext) -> Result<()> {
    for feed in ctx.cache.update().await? {
        println!("{}", serde_json::to_string(&feed)?);
    }
    Ok(())
}

pub fn flush(ctx: &AppContext) -> Result<()> {
    let count = ctx.cache.flush_counter()?;
    println!("{}", json!({ "ranked": count }));
    Ok(())
}

pub fn ranks(ctx: &AppContext, limit: Option<usize>) -> Result<()> {
    for uri in ctx.cache.ranks(limit)? {
        println!("{}", json!(uri));
    }
    Ok(())
}

pub fn list(ctx: &AppContext) -> Result<()> {
    for uri in ctx.cache.list()? {
        println!("{}", json!(uri));
    }
    Ok(())
}

pub fn has(ctx: &AppContext, url: &str) -> Result<()> {
    let has = ctx.cache.has(url)?;
    println!("{}", json!({ "url": url, "has": has }));
    Ok(())
}

pub fn remove(ctx: &AppContext, url: &str) -> Result<()> {
    ctx.cache.remove(url)?;
    println!("{}", json!({ "url": url, "removed": true }));
    Ok(())
}

pub fn reset_ranks(ctx: &AppContext) -> Result<()> {
    ctx.cache.reset_ranks()?;
    println!("{}", json!({ "reset": true }));
    Ok(())
}

pub async fn watch(ctx: &AppContext, interval: &str, no_initial_update: bool) -> Result<()> {
    let config = RefreshConfig {
        interval_secs: RefreshConfig::parse_interval(interval)?,
        update_on_start: !no_initial_update,
    };
    Refresher::new(ctx.cache.clone(), config).run().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_inputs_applies_since_to_urls() {
        let urls = vec![
            "http://a.com/feed".to_string(),
            r#"{"url": "http://b.com/feed"}"#.to_string(),
        ];
        let inputs = build_inputs(&urls, Some("1970-01-01T00:00:00.100Z")).unwrap();

        let first = inputs[0].clone().decode(false).unwrap();
        assert_eq!(first.since(), 100);
        let second = inputs[1].clone().decode(false).unwrap();
        assert_eq!(second.url(), "http://b.com/feed");
        assert_eq!(second.since(), 0);
    }

    #[test]
    fn test_build_inputs_rejects_bad_since() {
        let urls = vec!["http://a.com/feed".to_string()];
        assert!(matches!(
            build_inputs(&urls, Some("yesterday")),
            Err(RunnelError::InvalidQuery(_))
        ));
    }
}
