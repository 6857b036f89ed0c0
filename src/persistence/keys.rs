//! Keyspace layout.
//!
//! These names are shared with existing deployments and must not change.

pub const RETAINED: &str = "retained:";
pub const CLIENT_SUB: &str = "client:sub:";
pub const SUB_CLIENT: &str = "sub:client:";
pub const OFFLINE_CLIENTS: &str = "counter:offline:clients";
pub const OFFLINE_SUBSCRIPTIONS: &str = "counter:offline:subscriptions";
pub const OUTGOING: &str = "outgoing:";
pub const OUTGOING_ID: &str = "outgoing-id:";
pub const INCOMING: &str = "incoming:";
pub const WILL: &str = "will:";

/// `retained:<topic>`
pub fn retained(topic: &str) -> String {
    format!("{}{}", RETAINED, topic)
}

/// `client:sub:<clientId>`, hash of topic -> qos
pub fn client_sub(client_id: &str) -> String {
    format!("{}{}", CLIENT_SUB, client_id)
}

/// `sub:client:<topic>`, hash of clientId -> encoded subscription
pub fn sub_client(topic: &str) -> String {
    format!("{}{}", SUB_CLIENT, topic)
}

/// `outgoing:<clientId>:<brokerId>:<brokerCounter>`
pub fn outgoing(client_id: &str, broker_id: &str, broker_counter: u64) -> String {
    format!("{}{}:{}:{}", OUTGOING, client_id, broker_id, broker_counter)
}

/// Prefix of every outgoing key of a client
pub fn outgoing_prefix(client_id: &str) -> String {
    format!("{}{}:", OUTGOING, client_id)
}

/// `outgoing-id:<clientId>:<messageId>`
pub fn outgoing_id(client_id: &str, message_id: u16) -> String {
    format!("{}{}:{}", OUTGOING_ID, client_id, message_id)
}

/// `incoming:<clientId>:<messageId>`
pub fn incoming(client_id: &str, message_id: u16) -> String {
    format!("{}{}:{}", INCOMING, client_id, message_id)
}

/// `will:<brokerId>:<clientId>`
pub fn will(broker_id: &str, client_id: &str) -> String {
    format!("{}{}:{}", WILL, broker_id, client_id)
}

/// Owning broker id embedded in a will key
pub fn will_broker(key: &str) -> Option<&str> {
    key.strip_prefix(WILL)?.split(':').next()
}
