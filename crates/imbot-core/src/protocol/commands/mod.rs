//! Command names and body types for every supported command

pub mod config_push;
pub mod friendlist;
pub mod login;
pub mod message_svc;
pub mod online_push;
pub mod stat_svc;

// ----------------------------------------------------------------------------
// Command Names
// ----------------------------------------------------------------------------

pub const WTLOGIN_LOGIN: &str = "wtlogin.login";
pub const WTLOGIN_EXCHANGE_EMP: &str = "wtlogin.exchange_emp";

pub const STAT_REGISTER: &str = "StatSvc.register";
pub const STAT_SIMPLE_GET: &str = "StatSvc.SimpleGet";
pub const STAT_MSF_OFFLINE: &str = "StatSvc.ReqMSFOffline";
pub const STAT_MSF_OFFLINE_RESP: &str = "StatSvc.RspMSFForceOffline";
pub const HEARTBEAT_ALIVE: &str = "Heartbeat.Alive";

pub const FRIEND_LIST: &str = "friendlist.getFriendGroupList";
pub const GROUP_LIST: &str = "friendlist.GetTroopListReqV2";
pub const MEMBER_LIST: &str = "friendlist.GetTroopMemberListReq";

pub const PB_SEND_MSG: &str = "MessageSvc.PbSendMsg";
pub const PB_GET_MSG: &str = "MessageSvc.PbGetMsg";
pub const PB_MSG_WITHDRAW: &str = "PbMessageSvc.PbMsgWithDraw";
pub const PUSH_NOTIFY: &str = "MessageSvc.PushNotify";
pub const PUSH_FORCE_OFFLINE: &str = "MessageSvc.PushForceOffline";

pub const PUSH_GROUP_MSG: &str = "OnlinePush.PbPushGroupMsg";
pub const ONLINE_PUSH_REQ: &str = "OnlinePush.ReqPush";
pub const ONLINE_PUSH_RESP: &str = "OnlinePush.RespPush";

pub const CONFIG_PUSH_REQ: &str = "ConfigPushSvc.PushReq";
pub const CONFIG_PUSH_RESP: &str = "ConfigPushSvc.PushResp";

/// Whether a command travels in the login envelope
pub fn is_login_command(command: &str) -> bool {
    command.starts_with("wtlogin.")
}
