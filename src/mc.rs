//! Module `mc` define the decoded form of binary memcached-style
//! requests and responses.
//!
//! On-wire framing is not handled here, a transport in front of the
//! dispatcher is expected to decode frames into [McRequest] records and
//! encode [McResponse] records back out. Key-to-vbucket hashing is the
//! client's burden in this protocol, requests arrive already carrying
//! their vbucket-id.

use std::fmt;

/// Request opcodes understood by the dispatcher.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Opcode {
    Get,
    Set,
    Add,
    Replace,
    Delete,
    Incr,
    Decr,
    Noop,
    GetQ,
    SetQ,
    DeleteQ,
    SetVBState,
    GetVBState,
    DelVBucket,
    TapConnect,
    Observe,
}

impl Opcode {
    /// Wire code for this opcode.
    pub fn to_code(&self) -> u8 {
        use Opcode::*;

        match self {
            Get => 0x00,
            Set => 0x01,
            Add => 0x02,
            Replace => 0x03,
            Delete => 0x04,
            Incr => 0x05,
            Decr => 0x06,
            Noop => 0x0a,
            GetQ => 0x09,
            SetQ => 0x11,
            DeleteQ => 0x14,
            SetVBState => 0x3d,
            GetVBState => 0x3e,
            DelVBucket => 0x3f,
            TapConnect => 0x40,
            Observe => 0x92,
        }
    }

    pub fn from_code(code: u8) -> Option<Opcode> {
        use Opcode::*;

        let val = match code {
            0x00 => Get,
            0x01 => Set,
            0x02 => Add,
            0x03 => Replace,
            0x04 => Delete,
            0x05 => Incr,
            0x06 => Decr,
            0x0a => Noop,
            0x09 => GetQ,
            0x11 => SetQ,
            0x14 => DeleteQ,
            0x3d => SetVBState,
            0x3e => GetVBState,
            0x3f => DelVBucket,
            0x40 => TapConnect,
            0x92 => Observe,
            _ => return None,
        };
        Some(val)
    }

    /// Whether this opcode reads or mutates item data, as opposed to
    /// administering vbucket state. Data opcodes are rejected against
    /// non-active vbuckets.
    pub fn is_data(&self) -> bool {
        use Opcode::*;

        matches!(
            self,
            Get | Set | Add | Replace | Delete | Incr | Decr | GetQ | SetQ | DeleteQ
        )
    }

    /// Quiet opcodes suppress success responses.
    pub fn is_quiet(&self) -> bool {
        use Opcode::*;

        matches!(self, GetQ | SetQ | DeleteQ)
    }
}

/// Response status, with its binary-protocol wire code.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Status {
    Success,
    KeyNotFound,
    KeyExists,
    Einval,
    NotStored,
    DeltaBadval,
    NotMyVBucket,
    UnknownCommand,
    Enomem,
}

impl Status {
    pub fn to_code(&self) -> u16 {
        use Status::*;

        match self {
            Success => 0x0000,
            KeyNotFound => 0x0001,
            KeyExists => 0x0002,
            Einval => 0x0004,
            NotStored => 0x0005,
            DeltaBadval => 0x0006,
            NotMyVBucket => 0x0007,
            UnknownCommand => 0x0081,
            Enomem => 0x0082,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{:?}(0x{:04x})", self, self.to_code())
    }
}

/// One decoded request record.
#[derive(Clone, Debug)]
pub struct McRequest {
    pub opcode: Opcode,
    pub vbucket: u16,
    pub key: Vec<u8>,
    pub body: Vec<u8>,
    pub cas: u64,
    pub flags: u32,
    pub expiration: u32,
    /// Applies to Incr/Decr.
    pub delta: u64,
    /// Applies to Incr/Decr, value to seed a missing key with.
    pub initial: Option<u64>,
}

impl McRequest {
    pub fn new(opcode: Opcode, vbucket: u16) -> McRequest {
        McRequest {
            opcode,
            vbucket,
            key: Vec::default(),
            body: Vec::default(),
            cas: 0,
            flags: 0,
            expiration: 0,
            delta: 0,
            initial: None,
        }
    }

    pub fn set_key(&mut self, key: Vec<u8>) -> &mut Self {
        self.key = key;
        self
    }

    pub fn set_body(&mut self, body: Vec<u8>) -> &mut Self {
        self.body = body;
        self
    }

    pub fn set_cas(&mut self, cas: u64) -> &mut Self {
        self.cas = cas;
        self
    }

    pub fn set_flags(&mut self, flags: u32) -> &mut Self {
        self.flags = flags;
        self
    }

    pub fn set_expiration(&mut self, expiration: u32) -> &mut Self {
        self.expiration = expiration;
        self
    }

    pub fn set_delta(&mut self, delta: u64, initial: Option<u64>) -> &mut Self {
        self.delta = delta;
        self.initial = initial;
        self
    }

    pub fn to_opcode(&self) -> Opcode {
        self.opcode
    }
}

/// One decoded response record.
#[derive(Clone, Debug)]
pub struct McResponse {
    pub status: Status,
    pub cas: u64,
    pub flags: u32,
    pub body: Vec<u8>,
}

impl McResponse {
    pub fn new(status: Status) -> McResponse {
        McResponse {
            status,
            cas: 0,
            flags: 0,
            body: Vec::default(),
        }
    }

    pub fn with_item(cas: u64, flags: u32, body: Vec<u8>) -> McResponse {
        McResponse {
            status: Status::Success,
            cas,
            flags,
            body,
        }
    }

    pub fn set_cas(mut self, cas: u64) -> Self {
        self.cas = cas;
        self
    }

    pub fn set_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }
}
