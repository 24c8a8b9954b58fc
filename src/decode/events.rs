//! Typed catalogue of domain events and their storage layout.
//!
//! Every variant maps to a stable `(namespace, table)` coordinate. Rows start with the common
//! columns `blockNumber, timestamp, transactionIndex, logIndex, [batchIndex], transactionHash`
//! followed by the variant fields in declaration order.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::LazyLock;

/// Storage type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ColumnType {
    Int,
    BigInt,
    Address,
    Hash,
    Bytes,
    Text,
    Bool,
    AddressList,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
}

impl Column {
    pub const fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
        }
    }

    pub const fn nullable(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: true,
        }
    }
}

/// Storage coordinate and ordered column list for one logical table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableDescriptor {
    pub namespace: &'static str,
    pub table: &'static str,
    pub columns: Vec<Column>,
}

impl TableDescriptor {
    pub fn qualified_name(&self) -> String {
        format!("{}_{}", self.namespace, self.table)
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|column| column.name == name)
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(u64),
    BigInt(U256),
    Address(Address),
    Hash(B256),
    Bytes(Bytes),
    Text(String),
    Bool(bool),
    AddressList(Vec<Address>),
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Int(a), Value::Int(b)) => a.partial_cmp(b),
            (Value::BigInt(a), Value::BigInt(b)) => a.partial_cmp(b),
            (Value::Int(a), Value::BigInt(b)) => U256::from(*a).partial_cmp(b),
            (Value::BigInt(a), Value::Int(b)) => a.partial_cmp(&U256::from(*b)),
            (Value::Address(a), Value::Address(b)) => a.partial_cmp(b),
            (Value::Hash(a), Value::Hash(b)) => a.partial_cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.partial_cmp(b),
            (Value::Text(a), Value::Text(b)) => a.partial_cmp(b),
            (Value::Bool(a), Value::Bool(b)) => a.partial_cmp(b),
            (Value::AddressList(a), Value::AddressList(b)) => a.partial_cmp(b),
            _ => None,
        }
    }
}

pub type Row = Vec<Value>;

/// Conversion of a typed event field into a cell.
pub trait ColumnValue {
    const TYPE: ColumnType;
    fn to_value(&self) -> Value;
}

impl ColumnValue for u64 {
    const TYPE: ColumnType = ColumnType::Int;
    fn to_value(&self) -> Value {
        Value::Int(*self)
    }
}

impl ColumnValue for u8 {
    const TYPE: ColumnType = ColumnType::Int;
    fn to_value(&self) -> Value {
        Value::Int(u64::from(*self))
    }
}

impl ColumnValue for bool {
    const TYPE: ColumnType = ColumnType::Bool;
    fn to_value(&self) -> Value {
        Value::Bool(*self)
    }
}

impl ColumnValue for U256 {
    const TYPE: ColumnType = ColumnType::BigInt;
    fn to_value(&self) -> Value {
        Value::BigInt(*self)
    }
}

impl ColumnValue for Address {
    const TYPE: ColumnType = ColumnType::Address;
    fn to_value(&self) -> Value {
        Value::Address(*self)
    }
}

impl ColumnValue for B256 {
    const TYPE: ColumnType = ColumnType::Hash;
    fn to_value(&self) -> Value {
        Value::Hash(*self)
    }
}

impl ColumnValue for Bytes {
    const TYPE: ColumnType = ColumnType::Bytes;
    fn to_value(&self) -> Value {
        Value::Bytes(self.clone())
    }
}

impl ColumnValue for String {
    const TYPE: ColumnType = ColumnType::Text;
    fn to_value(&self) -> Value {
        Value::Text(self.clone())
    }
}

impl ColumnValue for Vec<Address> {
    const TYPE: ColumnType = ColumnType::AddressList;
    fn to_value(&self) -> Value {
        Value::AddressList(self.clone())
    }
}

pub const COL_BLOCK_NUMBER: &str = "blockNumber";
pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_TRANSACTION_INDEX: &str = "transactionIndex";
pub const COL_LOG_INDEX: &str = "logIndex";
pub const COL_BATCH_INDEX: &str = "batchIndex";
pub const COL_TRANSACTION_HASH: &str = "transactionHash";
pub const COL_BLOCK_HASH: &str = "blockHash";

macro_rules! event_catalogue {
    (@batched) => { false };
    (@batched $batched:literal) => { $batched };
    ($(
        $(#[$doc:meta])*
        $variant:ident => $namespace:literal / $table:literal $(, batched = $batched:literal)? {
            $($field:ident : $fty:ty => $column:literal),* $(,)?
        }
    ),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, PartialEq, Eq)]
            pub struct $variant {
                $(pub $field: $fty,)*
            }

            impl From<$variant> for EventKind {
                fn from(event: $variant) -> Self {
                    EventKind::$variant(event)
                }
            }
        )*

        /// Tagged union over every decodable event.
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum EventKind {
            $($variant($variant),)*
        }

        /// Field-less discriminant of [`EventKind`].
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
        pub enum EventType {
            $($variant,)*
        }

        impl EventType {
            pub const ALL: &'static [EventType] = &[$(EventType::$variant,)*];

            pub fn namespace(self) -> &'static str {
                match self {
                    $(EventType::$variant => $namespace,)*
                }
            }

            pub fn table(self) -> &'static str {
                match self {
                    $(EventType::$variant => $table,)*
                }
            }

            /// Whether one log of this kind may expand into several rows.
            pub fn is_batched(self) -> bool {
                match self {
                    $(EventType::$variant => event_catalogue!(@batched $($batched)?),)*
                }
            }

            fn field_columns(self) -> Vec<Column> {
                match self {
                    $(EventType::$variant => vec![
                        $(Column::new($column, <$fty as ColumnValue>::TYPE),)*
                    ],)*
                }
            }
        }

        impl EventKind {
            pub fn event_type(&self) -> EventType {
                match self {
                    $(EventKind::$variant(_) => EventType::$variant,)*
                }
            }

            pub fn field_values(&self) -> Vec<Value> {
                match self {
                    $(EventKind::$variant(event) => vec![
                        $(ColumnValue::to_value(&event.$field),)*
                    ],)*
                }
            }
        }
    };
}

event_catalogue! {
    // Circles v1 hub and tokens.
    CrcV1Signup => "CrcV1" / "Signup" {
        user: Address => "user",
        token: Address => "token",
    },
    CrcV1OrganizationSignup => "CrcV1" / "OrganizationSignup" {
        organization: Address => "organization",
    },
    CrcV1HubTransfer => "CrcV1" / "HubTransfer" {
        from: Address => "from",
        to: Address => "to",
        amount: U256 => "amount",
    },
    CrcV1Trust => "CrcV1" / "Trust" {
        user: Address => "user",
        can_send_to: Address => "canSendTo",
        limit: U256 => "limit",
    },
    CrcV1Transfer => "CrcV1" / "Transfer" {
        token_address: Address => "tokenAddress",
        from: Address => "from",
        to: Address => "to",
        amount: U256 => "amount",
    },

    // Circles v2 hub.
    CrcV2Stopped => "CrcV2" / "Stopped" {
        avatar: Address => "avatar",
    },
    CrcV2Trust => "CrcV2" / "Trust" {
        truster: Address => "truster",
        trustee: Address => "trustee",
        expiry_time: U256 => "expiryTime",
    },
    CrcV2InviteHuman => "CrcV2" / "InviteHuman" {
        inviter: Address => "inviter",
        invited: Address => "invited",
    },
    CrcV2PersonalMint => "CrcV2" / "PersonalMint" {
        human: Address => "human",
        amount: U256 => "amount",
        start_period: U256 => "startPeriod",
        end_period: U256 => "endPeriod",
    },
    CrcV2RegisterHuman => "CrcV2" / "RegisterHuman" {
        avatar: Address => "avatar",
    },
    CrcV2RegisterGroup => "CrcV2" / "RegisterGroup" {
        group: Address => "group",
        mint: Address => "mint",
        treasury: Address => "treasury",
        name: String => "name",
        symbol: String => "symbol",
    },
    CrcV2RegisterOrganization => "CrcV2" / "RegisterOrganization" {
        organization: Address => "organization",
        name: String => "name",
    },
    CrcV2TransferSingle => "CrcV2" / "TransferSingle" {
        operator: Address => "operator",
        from: Address => "from",
        to: Address => "to",
        id: U256 => "id",
        value: U256 => "value",
    },
    CrcV2TransferBatch => "CrcV2" / "TransferBatch", batched = true {
        operator: Address => "operator",
        from: Address => "from",
        to: Address => "to",
        id: U256 => "id",
        value: U256 => "value",
    },
    CrcV2ApprovalForAll => "CrcV2" / "ApprovalForAll" {
        account: Address => "account",
        operator: Address => "operator",
        approved: bool => "approved",
    },
    CrcV2Uri => "CrcV2" / "URI" {
        id: U256 => "id",
        value: String => "value",
    },
    CrcV2DiscountCost => "CrcV2" / "DiscountCost" {
        account: Address => "account",
        id: U256 => "id",
        discount_cost: U256 => "discountCost",
    },
    CrcV2Erc20WrapperDeployed => "CrcV2" / "ERC20WrapperDeployed" {
        avatar: Address => "avatar",
        erc20_wrapper: Address => "erc20Wrapper",
        circles_type: u8 => "circlesType",
    },
    CrcV2Erc20WrapperTransfer => "CrcV2" / "Erc20WrapperTransfer" {
        token_address: Address => "tokenAddress",
        from: Address => "from",
        to: Address => "to",
        amount: U256 => "amount",
    },
    CrcV2DepositInflationary => "CrcV2" / "DepositInflationary" {
        account: Address => "account",
        amount: U256 => "amount",
        demurraged_amount: U256 => "demurragedAmount",
    },
    CrcV2WithdrawInflationary => "CrcV2" / "WithdrawInflationary" {
        account: Address => "account",
        amount: U256 => "amount",
        demurraged_amount: U256 => "demurragedAmount",
    },
    CrcV2DepositDemurraged => "CrcV2" / "DepositDemurraged" {
        account: Address => "account",
        amount: U256 => "amount",
        inflationary_amount: U256 => "inflationaryAmount",
    },
    CrcV2WithdrawDemurraged => "CrcV2" / "WithdrawDemurraged" {
        account: Address => "account",
        amount: U256 => "amount",
        inflationary_amount: U256 => "inflationaryAmount",
    },

    // Name registry.
    CrcV2RegisterShortName => "CrcV2" / "RegisterShortName" {
        avatar: Address => "avatar",
        short_name: U256 => "shortName",
        nonce: U256 => "nonce",
    },
    CrcV2UpdateMetadataDigest => "CrcV2" / "UpdateMetadataDigest" {
        avatar: Address => "avatar",
        metadata_digest: B256 => "metadataDigest",
    },
    CrcV2CidV0 => "CrcV2" / "CidV0" {
        avatar: Address => "avatar",
        cid_v0_digest: B256 => "cidV0Digest",
    },

    // Standard treasury.
    CrcV2CreateVault => "CrcV2" / "CreateVault" {
        group: Address => "group",
        vault: Address => "vault",
    },
    CrcV2CollateralLockedSingle => "CrcV2" / "CollateralLockedSingle" {
        group: Address => "group",
        id: U256 => "id",
        value: U256 => "value",
        user_data: Bytes => "userData",
    },
    CrcV2CollateralLockedBatch => "CrcV2" / "CollateralLockedBatch", batched = true {
        group: Address => "group",
        id: U256 => "id",
        value: U256 => "value",
        user_data: Bytes => "userData",
    },
    CrcV2GroupRedeem => "CrcV2" / "GroupRedeem" {
        group: Address => "group",
        id: U256 => "id",
        value: U256 => "value",
        data: Bytes => "data",
    },
    CrcV2GroupRedeemCollateralReturn => "CrcV2" / "GroupRedeemCollateralReturn", batched = true {
        group: Address => "group",
        to: Address => "to",
        id: U256 => "id",
        value: U256 => "value",
    },
    CrcV2GroupRedeemCollateralBurn => "CrcV2" / "GroupRedeemCollateralBurn", batched = true {
        group: Address => "group",
        id: U256 => "id",
        value: U256 => "value",
    },

    // Metri wallets (Safe + Gnosis Pay).
    MetriProxyCreation => "Metri" / "ProxyCreation" {
        proxy: Address => "proxy",
        singleton: Address => "singleton",
    },
    MetriModuleProxyCreation => "Metri" / "ModuleProxyCreation" {
        proxy: Address => "proxy",
        master_copy: Address => "masterCopy",
    },
    MetriOwnershipTransferred => "Metri" / "OwnershipTransferred" {
        module: Address => "module",
        from: Address => "from",
        to: Address => "to",
    },
    MetriGnosisPayOgNftTransfer => "Metri" / "GnosisPayOGNftTransfer" {
        from: Address => "from",
        to: Address => "to",
        token_id: U256 => "tokenId",
    },
    MetriErc20Transfer => "Metri" / "Erc20Transfer" {
        token_address: Address => "tokenAddress",
        from: Address => "from",
        to: Address => "to",
        value: U256 => "value",
    },
    MetriExecutionSuccess => "Metri" / "ExecutionSuccess" {
        safe: Address => "safe",
        tx_hash: B256 => "txHash",
        payment: U256 => "payment",
    },
    MetriExecutionFailure => "Metri" / "ExecutionFailure" {
        safe: Address => "safe",
        tx_hash: B256 => "txHash",
        payment: U256 => "payment",
    },
    MetriSafeMultiSigTransaction => "Metri" / "SafeMultiSigTransaction" {
        safe: Address => "safe",
        to: Address => "to",
        value: U256 => "value",
        data: Bytes => "data",
        operation: u8 => "operation",
        safe_tx_gas: U256 => "safeTxGas",
        base_gas: U256 => "baseGas",
        gas_price: U256 => "gasPrice",
        gas_token: Address => "gasToken",
        refund_receiver: Address => "refundReceiver",
        signatures: Bytes => "signatures",
        additional_info: Bytes => "additionalInfo",
    },
    MetriSafeReceived => "Metri" / "SafeReceived" {
        safe: Address => "safe",
        sender: Address => "sender",
        value: U256 => "value",
    },
    MetriSafeSetup => "Metri" / "SafeSetup" {
        safe: Address => "safe",
        initiator: Address => "initiator",
        owners: Vec<Address> => "owners",
        threshold: U256 => "threshold",
        initializer: Address => "initializer",
        fallback_handler: Address => "fallbackHandler",
    },
    MetriRemovedOwner => "Metri" / "RemovedOwner" {
        safe: Address => "safe",
        owner: Address => "owner",
    },
    MetriTrade => "Metri" / "Trade" {
        owner: Address => "owner",
        sell_token: Address => "sellToken",
        buy_token: Address => "buyToken",
        sell_amount: U256 => "sellAmount",
        buy_amount: U256 => "buyAmount",
        fee_amount: U256 => "feeAmount",
        order_uid: Bytes => "orderUid",
    },
    /// Native value moved to or from a known Safe, reconstructed from the transaction itself.
    MetriXdaiTransfer => "Metri" / "XdaiTransfer" {
        from: Address => "from",
        to: Address => "to",
        value: U256 => "value",
    },
    /// `enableModule(address)` found in call-data sent to a known Safe.
    MetriEnableModuleCall => "Metri" / "EnableModuleCall" {
        safe: Address => "safe",
        module: Address => "module",
    },
}

static DESCRIPTORS: LazyLock<Vec<TableDescriptor>> = LazyLock::new(|| {
    EventType::ALL
        .iter()
        .map(|event_type| event_type.build_descriptor())
        .collect()
});

static BLOCKS_DESCRIPTOR: LazyLock<TableDescriptor> = LazyLock::new(|| TableDescriptor {
    namespace: "System",
    table: "Block",
    columns: vec![
        Column::new(COL_BLOCK_NUMBER, ColumnType::Int),
        Column::new(COL_TIMESTAMP, ColumnType::Int),
        Column::new(COL_BLOCK_HASH, ColumnType::Hash),
    ],
});

impl EventType {
    fn build_descriptor(self) -> TableDescriptor {
        let mut columns = vec![
            Column::new(COL_BLOCK_NUMBER, ColumnType::Int),
            Column::new(COL_TIMESTAMP, ColumnType::Int),
            Column::new(COL_TRANSACTION_INDEX, ColumnType::Int),
            Column::new(COL_LOG_INDEX, ColumnType::Int),
        ];
        if self.is_batched() {
            columns.push(Column::nullable(COL_BATCH_INDEX, ColumnType::Int));
        }
        columns.push(Column::new(COL_TRANSACTION_HASH, ColumnType::Hash));
        columns.extend(self.field_columns());
        TableDescriptor {
            namespace: self.namespace(),
            table: self.table(),
            columns,
        }
    }

    pub fn descriptor(self) -> &'static TableDescriptor {
        &DESCRIPTORS[self as usize]
    }
}

/// Table holding one record per committed block.
pub fn blocks_descriptor() -> &'static TableDescriptor {
    &BLOCKS_DESCRIPTOR
}

/// Every table the indexer writes, blocks first.
pub fn all_descriptors() -> Vec<&'static TableDescriptor> {
    std::iter::once(blocks_descriptor())
        .chain(EventType::ALL.iter().map(|event_type| event_type.descriptor()))
        .collect()
}

/// Position of an event inside the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventMeta {
    pub block_number: u64,
    pub timestamp: u64,
    pub transaction_index: u32,
    pub log_index: u32,
    pub batch_index: Option<u32>,
    pub transaction_hash: B256,
}

impl EventMeta {
    pub fn with_batch_index(self, batch_index: u32) -> Self {
        Self {
            batch_index: Some(batch_index),
            ..self
        }
    }
}

/// `(blockNumber, transactionIndex, logIndex, batchIndex)`.
pub type EventIdentity = (u64, u32, u32, Option<u32>);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainEvent {
    pub meta: EventMeta,
    pub kind: EventKind,
}

impl DomainEvent {
    pub fn new(meta: EventMeta, kind: impl Into<EventKind>) -> Self {
        Self {
            meta,
            kind: kind.into(),
        }
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn identity(&self) -> EventIdentity {
        (
            self.meta.block_number,
            self.meta.transaction_index,
            self.meta.log_index,
            self.meta.batch_index,
        )
    }

    /// Ordering key within a block.
    pub fn position(&self) -> (u32, u32, Option<u32>) {
        (
            self.meta.transaction_index,
            self.meta.log_index,
            self.meta.batch_index,
        )
    }

    /// Row in the column order of [`EventType::descriptor`].
    pub fn row(&self) -> Row {
        let meta = &self.meta;
        let mut row = vec![
            Value::Int(meta.block_number),
            Value::Int(meta.timestamp),
            Value::Int(u64::from(meta.transaction_index)),
            Value::Int(u64::from(meta.log_index)),
        ];
        if self.event_type().is_batched() {
            row.push(
                meta.batch_index
                    .map(|index| Value::Int(u64::from(index)))
                    .unwrap_or(Value::Null),
            );
        }
        row.push(Value::Hash(meta.transaction_hash));
        row.extend(self.kind.field_values());
        row
    }
}

/// Persisted record of a committed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRecord {
    pub number: u64,
    pub timestamp: u64,
    pub hash: B256,
}

impl BlockRecord {
    pub fn row(&self) -> Row {
        vec![
            Value::Int(self.number),
            Value::Int(self.timestamp),
            Value::Hash(self.hash),
        ]
    }
}
