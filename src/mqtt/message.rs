/// Things we send to the broker.
#[derive(Debug, PartialEq, Eq)]
pub enum Outgoing {
    /// Subscribe to a new topic given as argument. Not a real message.
    Subscribe(String),
    /// Send on initialization once.
    Initial,
    /// Current value of a field, JSON encoded.
    State { topic: String, payload: String },
}

/// Things the broker sends to us.
#[derive(Debug)]
pub enum Incoming {
    /// Session (re)established. Subscriptions and state need to be resent.
    Connected,
    /// Message on one of the subscribed topics.
    Publish { topic: String, payload: String },
}
