use search_transport::{BulkBody, RequestParams, Transport};
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let transport = Transport::from_env()?;

    let exists = transport.request(RequestParams::head("/books")).await?;
    if exists.body.as_bool() != Some(true) {
        transport
            .request(RequestParams::put("/books").body(json!({
                "mappings": { "properties": { "title": { "type": "text" } } }
            })))
            .await?;
    }

    transport
        .request(
            RequestParams::post("/_bulk")
                .query("refresh", "wait_for")
                .bulk_body(BulkBody::Documents(vec![
                    json!({ "index": { "_index": "books", "_id": "1" } }),
                    json!({ "title": "Dune" }),
                ])),
        )
        .await?;

    let result = transport
        .request(
            RequestParams::post("/books/_search")
                .body(json!({ "query": { "match": { "title": "dune" } } })),
        )
        .await?;

    for warning in &result.warnings {
        eprintln!("warning: {warning}");
    }
    println!("{:?}", result.body.as_json());

    if let Some(hosts) = transport.sniff().await? {
        println!("cluster has {} nodes", hosts.len());
    }

    Ok(())
}
