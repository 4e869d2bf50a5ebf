// handlers/mod.rs - HTTP handlers grouped by API surface
//
// whatsapp: chat inbox snapshot, push feed and response mode (/api/Whatsapp/*)
// webbot:   onboarding form storage (/api/webbot/*)
// root:     tenant registry inspection (/api/root/*)

pub mod root;
pub mod webbot;
pub mod whatsapp;
