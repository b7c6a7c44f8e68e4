use axum::Json;
use serde_json::{json, Value};

/// JSON-Home document describing the v2 resources.
pub async fn home_document() -> Json<Value> {
    Json(json!({
        "resources": {
            "rel/queues": {
                "href-template": "/v2/queues{?marker,limit,detailed}",
                "href-vars": {
                    "marker": "param/marker",
                    "limit": "param/queue_limit",
                    "detailed": "param/detailed"
                },
                "hints": { "allow": ["GET"], "formats": { "application/json": {} } }
            },
            "rel/queue": {
                "href-template": "/v2/queues/{queue_name}",
                "href-vars": { "queue_name": "param/queue_name" },
                "hints": { "allow": ["GET", "PUT", "DELETE"], "formats": { "application/json": {} } }
            },
            "rel/queue_stats": {
                "href-template": "/v2/queues/{queue_name}/stats",
                "href-vars": { "queue_name": "param/queue_name" },
                "hints": { "allow": ["GET"], "formats": { "application/json": {} } }
            },
            "rel/messages": {
                "href-template": "/v2/queues/{queue_name}/messages{?marker,limit,echo,include_claimed}",
                "href-vars": {
                    "queue_name": "param/queue_name",
                    "marker": "param/marker",
                    "limit": "param/messages_limit",
                    "echo": "param/echo",
                    "include_claimed": "param/include_claimed"
                },
                "hints": { "allow": ["GET", "POST", "DELETE"], "formats": { "application/json": {} } }
            },
            "rel/claims": {
                "href-template": "/v2/queues/{queue_name}/claims{?limit}",
                "href-vars": {
                    "queue_name": "param/queue_name",
                    "limit": "param/claim_limit"
                },
                "hints": { "allow": ["POST"], "formats": { "application/json": {} } }
            },
            "rel/subscriptions": {
                "href-template": "/v2/queues/{queue_name}/subscriptions{?marker,limit}",
                "href-vars": {
                    "queue_name": "param/queue_name",
                    "marker": "param/marker",
                    "limit": "param/subscription_limit"
                },
                "hints": { "allow": ["GET", "POST"], "formats": { "application/json": {} } }
            },
            "rel/pools": {
                "href-template": "/v2/pools{?marker,limit}",
                "href-vars": { "marker": "param/marker", "limit": "param/pool_limit" },
                "hints": { "allow": ["GET"], "formats": { "application/json": {} } }
            },
            "rel/flavors": {
                "href-template": "/v2/flavors{?marker,limit}",
                "href-vars": { "marker": "param/marker", "limit": "param/flavor_limit" },
                "hints": { "allow": ["GET"], "formats": { "application/json": {} } }
            }
        }
    }))
}
