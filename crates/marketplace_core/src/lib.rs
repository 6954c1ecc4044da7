pub mod connection;
pub mod domain;
pub mod ports;
pub mod store;
pub mod subscriptions;

pub use connection::{ConnectError, ConnectionMachine, Directive, FailureKind, ReconnectPolicy};
pub use domain::{
    AuthGrant, Category, ChatMessage, ConnectionState, ConversationStart, Item, ItemUpdate, NewItem,
    NotificationEvent, NotificationKey, NotificationRecord, OutgoingChatMessage, PayloadError,
    ReadReceipt, RemoteNotification, Session, StatusIndicator, UserProfile,
};
pub use ports::{
    AuthProvider, InboundFrame, MarketplaceBackend, PortError, PortResult, SessionProvider,
    SubscriptionId, Transport, TransportConnection,
};
pub use store::NotificationSet;
pub use subscriptions::{SubscriptionSet, TopicKind};
